//! Purpose: `tabula` CLI entry point.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: Commands emit JSON on stdout (pretty on a terminal, compact otherwise).
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: Commands that mutate indices flush them before exiting.
use std::ffi::OsString;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand, ValueHint, error::ErrorKind as ClapErrorKind};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

mod command_dispatch;
mod db_paths;

use db_paths::{database_name_from_path, default_database_dir};
use tabula::api::{
    Attributes, Database, DatabaseSchema, Error, ErrorKind, attributes_from_json,
    to_exit_code,
};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse_from(std::env::args_os().collect::<Vec<OsString>>()) {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Run `tabula --help` for usage."));
            }
        },
    };

    let db_dir = cli.dir.unwrap_or_else(default_database_dir);
    command_dispatch::dispatch_command(cli.command, db_dir)
        .map_err(add_schema_hint)
        .map_err(add_corrupt_hint)
        .map_err(add_io_hint)
        .map_err(add_internal_hint)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

#[derive(Parser)]
#[command(
    name = "tabula",
    version,
    about = "Typed tables stored as plain files, with per-field indices",
    long_about = None,
    after_help = r#"EXAMPLES
  $ tabula db create shop.json
  $ tabula insert shop orders '{"description": "order #1", "department_id": 1000}'
  $ tabula find shop orders '{"description": "order #1"}'
  $ tabula find shop orders '{"id": 1}'
  $ tabula db drop shop

NOTES
  - Default location: ~/.tabula/databases (override with --dir)
  - Set RUST_LOG=debug to see index loads, routing and flushes on stderr"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        help = "Directory holding databases (default: ~/.tabula/databases)",
        value_hint = ValueHint::DirPath
    )]
    dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(
        arg_required_else_help = true,
        about = "Create, inspect and drop databases",
        after_help = r#"EXAMPLES
  $ tabula db create shop.json
  $ tabula db info shop
  $ tabula db list
  $ tabula db drop shop"#
    )]
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    #[command(
        arg_required_else_help = true,
        about = "Insert one row (JSON object) or many (JSON array of objects)",
        after_help = r#"EXAMPLES
  $ tabula insert shop orders '{"description": "order #1"}'
  $ tabula insert shop orders -f orders.json

NOTES
  - The identifier field is assigned; supplying it is a schema error
  - `created_at` timestamp fields are filled with the current time when omitted"#
    )]
    Insert {
        #[arg(help = "Database name")]
        db: String,
        #[arg(help = "Table name")]
        table: String,
        #[arg(help = "Inline JSON object or array of objects")]
        data: Option<String>,
        #[arg(
            short = 'f',
            long = "file",
            help = "Read the JSON input from a file",
            conflicts_with = "data",
            value_hint = ValueHint::FilePath
        )]
        file: Option<PathBuf>,
    },
    #[command(
        arg_required_else_help = true,
        about = "Find the first row matching the given criteria",
        after_help = r#"NOTES
  - Indexed criteria are tried first; the first index hit wins
  - Without an indexed criterion, rows are scanned and the first row matching
    ANY criterion is returned"#
    )]
    Find {
        #[arg(help = "Database name")]
        db: String,
        #[arg(help = "Table name")]
        table: String,
        #[arg(help = "JSON object of field/value criteria")]
        criteria: String,
    },
    #[command(
        arg_required_else_help = true,
        about = "Rebuild a table's indices from its rows"
    )]
    Reindex {
        #[arg(help = "Database name")]
        db: String,
        #[arg(help = "Table name")]
        table: String,
    },
    #[command(about = "Generate shell completion scripts")]
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
    #[command(about = "Print version information")]
    Version,
}

#[derive(Subcommand)]
enum DbCommand {
    #[command(about = "Create a database from a JSON schema document")]
    Create {
        #[arg(help = "Schema file path", value_hint = ValueHint::FilePath)]
        schema: PathBuf,
    },
    #[command(about = "Show tables, fields, indices and last identifiers")]
    Info {
        #[arg(help = "Database name")]
        name: String,
    },
    #[command(about = "List databases in --dir")]
    List,
    #[command(about = "Drop databases (missing databases are not an error)")]
    Drop {
        #[arg(required = true, help = "Database names")]
        names: Vec<String>,
    },
}

fn read_input_file(path: &Path) -> Result<String, Error> {
    std::fs::read_to_string(path)
        .map_err(|err| Error::io(err, path).with_message("failed to read input file"))
}

fn parse_json_arg(text: &str, what: &str) -> Result<Value, Error> {
    serde_json::from_str(text).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("{what} is not valid JSON"))
            .with_source(err)
    })
}

fn load_schema(path: &Path) -> Result<DatabaseSchema, Error> {
    let text = read_input_file(path)?;
    DatabaseSchema::from_json(&text).map_err(|err| err.with_path(path))
}

fn parse_attributes(db: &Database, table: &str, json: &Value) -> Result<Attributes, Error> {
    let schema = db.table_schema(table)?;
    attributes_from_json(schema, json)
}

fn list_database_names(dir: &Path) -> Result<Vec<String>, Error> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(Error::io(err, dir).with_message("failed to read database directory"));
        }
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| {
            Error::io(err, dir).with_message("failed to read database directory entry")
        })?;
        if let Some(name) = database_name_from_path(&entry.path()) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

fn clap_error_summary(err: &clap::Error) -> String {
    let rendered = err.to_string();
    rendered
        .lines()
        .next()
        .unwrap_or("invalid arguments")
        .trim_start_matches("error: ")
        .to_string()
}

fn add_schema_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Schema || err.hint().is_some() {
        return err;
    }
    err.with_hint("Check field names and kinds with `tabula db info <db>`.")
}

fn add_corrupt_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Corrupt || err.hint().is_some() {
        return err;
    }
    let index_unit = err
        .path()
        .and_then(|path| path.extension())
        .is_some_and(|ext| ext == "idx");
    if index_unit {
        return err
            .with_hint("Index unit is damaged. Rebuild it with `tabula reindex <db> <table>`.");
    }
    err.with_hint("Stored data appears corrupt. Inspect the reported path.")
}

fn add_io_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::Permission => err.with_hint(
            "Permission denied. Check directory permissions or use --dir to a writable location.",
        ),
        ErrorKind::Io => err.with_hint("I/O error. Check the path, filesystem, and disk space."),
        _ => err,
    }
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint("Unexpected internal failure. Retry with RUST_LOG=debug and share the output.")
}

fn emit_json(value: Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    };
    println!(
        "{}",
        json.unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string())
    );
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
        return;
    }
    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::Schema => "schema validation failed".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::AlreadyExists => "already exists".to_string(),
        ErrorKind::Permission => "permission denied".to_string(),
        ErrorKind::Corrupt => "corrupt data".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(table) = err.table() {
        inner.insert("table".to_string(), json!(table));
    }
    if let Some(field) = err.field() {
        inner.insert("field".to_string(), json!(field));
    }
    if let Some(row_id) = err.row_id() {
        inner.insert("row_id".to_string(), json!(row_id));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("error: {}", error_message(err))];
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    if let Some(table) = err.table() {
        lines.push(format!("table: {table}"));
    }
    if let Some(field) = err.field() {
        lines.push(format!("field: {field}"));
    }
    if let Some(row_id) = err.row_id() {
        lines.push(format!("row: {row_id}"));
    }
    if let Some(path) = err.path() {
        lines.push(format!("path: {}", path.display()));
    }
    for cause in error_causes(err) {
        lines.push(format!("caused by: {cause}"));
    }
    lines.join("\n")
}
