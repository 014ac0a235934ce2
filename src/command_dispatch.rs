//! Purpose: Hold top-level CLI command dispatch for `tabula`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Insert and reindex flush indices before returning success.
//! Invariants: A rejected insert reports its own error even when the flush also fails.
//! Invariants: `find` with no matching row is a NotFound error, not an empty success.

use super::*;

pub(super) fn dispatch_command(command: Command, db_dir: PathBuf) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "tabula", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Version => {
            emit_json(json!({
                "name": "tabula",
                "version": env!("CARGO_PKG_VERSION"),
            }));
            Ok(RunOutcome::ok())
        }
        Command::Db { command } => dispatch_db_command(command, &db_dir),
        Command::Insert {
            db,
            table,
            data,
            file,
        } => {
            let text = match (data, file) {
                (Some(data), None) => data,
                (None, Some(file)) => read_input_file(&file)?,
                _ => {
                    return Err(Error::new(ErrorKind::Usage)
                        .with_message("insert requires inline JSON or --file")
                        .with_hint("Use `tabula insert <db> <table> '{...}'` or `-f rows.json`."));
                }
            };
            let input = parse_json_arg(&text, "insert data")?;
            let mut database = Database::open(&db_dir, &db)?;
            let created = insert_rows(&mut database, &table, &input);
            // Rows written before a failure keep their index entries.
            let created = settle_insert(created, database.flush())?;
            if input.is_array() {
                emit_json(json!({ "created": created }));
            } else {
                let row = created.into_iter().next().unwrap_or(Value::Null);
                emit_json(json!({ "created": row }));
            }
            Ok(RunOutcome::ok())
        }
        Command::Find {
            db,
            table,
            criteria,
        } => {
            let criteria = parse_json_arg(&criteria, "find criteria")?;
            let mut database = Database::open(&db_dir, &db)?;
            let criteria = parse_attributes(&database, &table, &criteria)?;
            match database.find_by(&table, &criteria)? {
                Some(row) => {
                    emit_json(json!({ "row": row.to_json()? }));
                    Ok(RunOutcome::ok())
                }
                None => Err(Error::new(ErrorKind::NotFound)
                    .with_message("no row matches the criteria")
                    .with_table(table)
                    .with_hint("Indexed criteria only match entries flushed to disk; try `tabula reindex`.")),
            }
        }
        Command::Reindex { db, table } => {
            let mut database = Database::open(&db_dir, &db)?;
            let rows = database.reindex(&table)?;
            emit_json(json!({
                "database": db,
                "table": table,
                "rows": rows,
            }));
            Ok(RunOutcome::ok())
        }
    }
}

fn dispatch_db_command(command: DbCommand, db_dir: &Path) -> Result<RunOutcome, Error> {
    match command {
        DbCommand::Create { schema } => {
            let schema = load_schema(&schema)?;
            let database = Database::create(db_dir, schema)?;
            emit_json(json!({ "created": database.info()? }));
            Ok(RunOutcome::ok())
        }
        DbCommand::Info { name } => {
            let database = Database::open(db_dir, &name)?;
            emit_json(json!({ "database": database.info()? }));
            Ok(RunOutcome::ok())
        }
        DbCommand::List => {
            let names = list_database_names(db_dir)?;
            emit_json(json!({
                "dir": db_dir.display().to_string(),
                "databases": names,
            }));
            Ok(RunOutcome::ok())
        }
        DbCommand::Drop { names } => {
            let mut dropped = Vec::new();
            let mut missing = Vec::new();
            for name in names {
                if Database::drop_database(db_dir, &name)? {
                    dropped.push(name);
                } else {
                    missing.push(name);
                }
            }
            emit_json(json!({ "dropped": dropped, "missing": missing }));
            Ok(RunOutcome::ok())
        }
    }
}

fn insert_rows(database: &mut Database, table: &str, input: &Value) -> Result<Vec<Value>, Error> {
    let items = match input {
        Value::Array(items) => items.iter().collect::<Vec<_>>(),
        other => vec![other],
    };
    let mut created = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        let attributes = parse_attributes(database, table, item).map_err(|err| {
            if input.is_array() {
                err.with_hint(format!("Row at position {idx} was rejected; earlier rows were kept."))
            } else {
                err
            }
        })?;
        let row = database.create_row(table, attributes)?;
        created.push(row.to_json()?);
    }
    Ok(created)
}

/// Combines the insert outcome with the flush that always follows it.
///
/// The insert error wins; a flush failure is then carried as a hint.
fn settle_insert(
    created: Result<Vec<Value>, Error>,
    flushed: Result<(), Error>,
) -> Result<Vec<Value>, Error> {
    match (created, flushed) {
        (Ok(created), Ok(())) => Ok(created),
        (Ok(_), Err(flush_err)) => Err(flush_err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(flush_err)) => {
            let note = format!("Index flush also failed: {flush_err}.");
            let hint = match err.hint() {
                Some(hint) => format!("{hint} {note}"),
                None => note,
            };
            Err(err.with_hint(hint))
        }
    }
}
