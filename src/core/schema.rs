// Table and database schema model: fields, identifier, index definitions.
//
// Schemas are validated once when built (or deserialized) and are read-only to
// the engine afterwards.
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind};
use crate::core::layout::RESERVED_TABLE_NAMES;
use crate::core::value::Attributes;

pub const DEFAULT_ID_FIELD: &str = "id";
pub const DEFAULT_TEXT_MAX_LEN: usize = 255;
/// Timestamp field filled with the current time on create when the caller omits it.
pub const CREATED_AT_FIELD: &str = "created_at";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    Identifier,
    Integer,
    Text {
        #[serde(default = "default_text_max_len")]
        max_len: usize,
    },
    Timestamp,
}

fn default_text_max_len() -> usize {
    DEFAULT_TEXT_MAX_LEN
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Identifier => "identifier",
            FieldKind::Integer => "integer",
            FieldKind::Text { .. } => "text",
            FieldKind::Timestamp => "timestamp",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(flatten)]
    pub kind: FieldKind,
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStrategy {
    #[default]
    Ordered,
    Hash,
}

impl IndexStrategy {
    pub fn name(self) -> &'static str {
        match self {
            IndexStrategy::Ordered => "ordered",
            IndexStrategy::Hash => "hash",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    pub field: String,
    #[serde(default)]
    pub strategy: IndexStrategy,
}

/// Validated description of one table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTable", into = "RawTable")]
pub struct TableSchema {
    name: String,
    id_field: String,
    fields: Vec<Field>,
    indices: Vec<IndexDef>,
}

impl TableSchema {
    pub fn builder(name: impl Into<String>) -> TableBuilder {
        TableBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    /// All fields in storage order: identifier first, then declaration order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|field| field.name.as_str())
    }

    pub fn indices(&self) -> &[IndexDef] {
        &self.indices
    }

    pub fn index_for(&self, field: &str) -> Option<&IndexDef> {
        self.indices.iter().find(|def| def.field == field)
    }

    pub fn created_at_field(&self) -> Option<&Field> {
        self.field(CREATED_AT_FIELD)
            .filter(|field| field.kind == FieldKind::Timestamp)
    }

    /// Rejects any attribute key that does not name a field of this table.
    pub fn validate_keys(&self, attributes: &Attributes) -> Result<(), Error> {
        let unknown = attributes
            .keys()
            .filter(|key| self.field(key).is_none())
            .map(String::as_str)
            .collect::<Vec<_>>();
        if unknown.is_empty() {
            return Ok(());
        }
        Err(Error::new(ErrorKind::Schema)
            .with_message(format!("fields {unknown:?} aren't found"))
            .with_table(&self.name))
    }
}

#[derive(Clone, Debug)]
pub struct TableBuilder {
    name: String,
    id_field: Option<String>,
    fields: Vec<Field>,
    indices: Vec<IndexDef>,
}

impl TableBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id_field: None,
            fields: Vec::new(),
            indices: Vec::new(),
        }
    }

    /// Renames the auto-incrementing identifier field (default `id`).
    pub fn identifier(mut self, name: impl Into<String>) -> Self {
        self.id_field = Some(name.into());
        self
    }

    pub fn integer(self, name: impl Into<String>) -> Self {
        self.field(name, FieldKind::Integer)
    }

    pub fn text(self, name: impl Into<String>, max_len: usize) -> Self {
        self.field(name, FieldKind::Text { max_len })
    }

    pub fn timestamp(self, name: impl Into<String>) -> Self {
        self.field(name, FieldKind::Timestamp)
    }

    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(Field::new(name, kind));
        self
    }

    pub fn index(mut self, field: impl Into<String>, strategy: IndexStrategy) -> Self {
        self.indices.push(IndexDef {
            field: field.into(),
            strategy,
        });
        self
    }

    pub fn build(self) -> Result<TableSchema, Error> {
        let table = self.name;
        validate_name("table", &table, &table)?;
        if RESERVED_TABLE_NAMES.contains(&table.as_str()) {
            return Err(schema_error(&table, &format!("table name {table:?} is reserved")));
        }

        let id_field = self.id_field.unwrap_or_else(|| DEFAULT_ID_FIELD.to_string());
        let mut fields = Vec::with_capacity(self.fields.len() + 1);
        fields.push(Field::new(id_field.clone(), FieldKind::Identifier));
        fields.extend(self.fields);

        let mut seen = BTreeSet::new();
        for (pos, field) in fields.iter().enumerate() {
            validate_name("field", &field.name, &table)?;
            if !seen.insert(field.name.as_str()) {
                return Err(schema_error(&table, "duplicate field name").with_field(&field.name));
            }
            match field.kind {
                FieldKind::Identifier if pos != 0 => {
                    return Err(schema_error(&table, "table has more than one identifier field")
                        .with_field(&field.name));
                }
                FieldKind::Text { max_len: 0 } => {
                    return Err(schema_error(&table, "text max_len must be positive")
                        .with_field(&field.name));
                }
                _ => {}
            }
        }

        let mut indexed = BTreeSet::new();
        for def in &self.indices {
            if def.field == id_field {
                return Err(schema_error(&table, "the identifier field cannot be indexed")
                    .with_field(&def.field));
            }
            if !seen.contains(def.field.as_str()) {
                return Err(schema_error(&table, "index references an unknown field")
                    .with_field(&def.field));
            }
            if !indexed.insert(def.field.as_str()) {
                return Err(schema_error(&table, "field has more than one index definition")
                    .with_field(&def.field));
            }
        }

        Ok(TableSchema {
            name: table,
            id_field,
            fields,
            indices: self.indices,
        })
    }
}

fn schema_error(table: &str, message: &str) -> Error {
    Error::new(ErrorKind::Schema)
        .with_message(message)
        .with_table(table)
}

/// Names become file and directory names on disk.
pub(crate) fn validate_name(what: &str, name: &str, table: &str) -> Result<(), Error> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if invalid {
        return Err(schema_error(table, &format!("invalid {what} name {name:?}")));
    }
    Ok(())
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct RawTable {
    name: String,
    fields: Vec<Field>,
    #[serde(default)]
    indices: Vec<IndexDef>,
}

impl TryFrom<RawTable> for TableSchema {
    type Error = Error;

    fn try_from(raw: RawTable) -> Result<Self, Self::Error> {
        let mut builder = TableSchema::builder(raw.name.clone());
        let mut has_identifier = false;
        for field in raw.fields {
            if field.kind == FieldKind::Identifier {
                if has_identifier {
                    return Err(schema_error(&raw.name, "table has more than one identifier field")
                        .with_field(&field.name));
                }
                has_identifier = true;
                builder = builder.identifier(field.name);
            } else {
                builder = builder.field(field.name, field.kind);
            }
        }
        for def in raw.indices {
            builder = builder.index(def.field, def.strategy);
        }
        builder.build()
    }
}

impl From<TableSchema> for RawTable {
    fn from(table: TableSchema) -> Self {
        Self {
            name: table.name,
            fields: table.fields,
            indices: table.indices,
        }
    }
}

/// A named set of tables; the unit that is created and dropped on disk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDatabase", into = "RawDatabase")]
pub struct DatabaseSchema {
    name: String,
    tables: Vec<TableSchema>,
}

impl DatabaseSchema {
    pub fn new(name: impl Into<String>, tables: Vec<TableSchema>) -> Result<Self, Error> {
        let name = name.into();
        if name.is_empty() || name.contains('/') || name.contains('\\') {
            return Err(Error::new(ErrorKind::Schema)
                .with_message(format!("invalid database name {name:?}")));
        }
        let mut seen = BTreeSet::new();
        for table in &tables {
            if !seen.insert(table.name()) {
                return Err(schema_error(table.name(), "duplicate table name"));
            }
        }
        Ok(Self { name, tables })
    }

    pub fn from_json(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text).map_err(|err| {
            Error::new(ErrorKind::Schema)
                .with_message(format!("invalid schema document: {err}"))
                .with_source(err)
        })
    }

    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string_pretty(self).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode schema")
                .with_source(err)
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|table| table.name() == name)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct RawDatabase {
    name: String,
    tables: Vec<TableSchema>,
}

impl TryFrom<RawDatabase> for DatabaseSchema {
    type Error = Error;

    fn try_from(raw: RawDatabase) -> Result<Self, Self::Error> {
        DatabaseSchema::new(raw.name, raw.tables)
    }
}

impl From<DatabaseSchema> for RawDatabase {
    fn from(schema: DatabaseSchema) -> Self {
        Self {
            name: schema.name,
            tables: schema.tables,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DatabaseSchema, FieldKind, IndexStrategy, TableSchema};
    use crate::core::error::ErrorKind;
    use crate::core::value::{Attributes, Value};

    fn orders() -> TableSchema {
        TableSchema::builder("orders")
            .integer("department_id")
            .text("description", 10)
            .timestamp("created_at")
            .index("description", IndexStrategy::Ordered)
            .build()
            .expect("orders")
    }

    #[test]
    fn identifier_comes_first_then_declaration_order() {
        let table = orders();
        let names = table.field_names().collect::<Vec<_>>();
        assert_eq!(names, ["id", "department_id", "description", "created_at"]);
        assert_eq!(table.id_field(), "id");
        assert_eq!(table.fields()[0].kind, FieldKind::Identifier);
        assert!(table.created_at_field().is_some());
    }

    #[test]
    fn custom_identifier_name() {
        let table = TableSchema::builder("comments")
            .identifier("comment_id")
            .integer("order_id")
            .index("order_id", IndexStrategy::Hash)
            .build()
            .expect("comments");
        assert_eq!(table.id_field(), "comment_id");
        assert_eq!(table.index_for("order_id").map(|def| def.strategy), Some(IndexStrategy::Hash));
        assert!(table.created_at_field().is_none());
    }

    #[test]
    fn invalid_definitions_are_rejected() {
        let cases = [
            TableSchema::builder("t").integer("a").integer("a").build(),
            TableSchema::builder("t").integer("id").build(),
            TableSchema::builder("t").integer("a").index("b", IndexStrategy::Ordered).build(),
            TableSchema::builder("t").integer("a").index("id", IndexStrategy::Hash).build(),
            TableSchema::builder("t")
                .integer("a")
                .index("a", IndexStrategy::Hash)
                .index("a", IndexStrategy::Ordered)
                .build(),
            TableSchema::builder("t").text("a", 0).build(),
            TableSchema::builder("a/b").integer("a").build(),
            TableSchema::builder("t").integer("..").build(),
        ];
        for result in cases {
            let err = result.expect_err("invalid table");
            assert_eq!(err.kind(), ErrorKind::Schema);
        }
    }

    #[test]
    fn created_at_must_be_a_timestamp_to_count() {
        let table = TableSchema::builder("t")
            .integer("created_at")
            .build()
            .expect("table");
        assert!(table.created_at_field().is_none());
    }

    #[test]
    fn validate_keys_names_unknown_fields() {
        let table = orders();
        let mut attrs = Attributes::new();
        attrs.insert("description".to_string(), Value::from("x"));
        table.validate_keys(&attrs).expect("known keys");

        attrs.insert("unknown_field".to_string(), Value::Int(1));
        let err = table.validate_keys(&attrs).expect_err("unknown key");
        assert_eq!(err.kind(), ErrorKind::Schema);
        assert!(err.message().unwrap_or_default().contains("unknown_field"));
        assert_eq!(err.table(), Some("orders"));
    }

    #[test]
    fn schema_json_round_trips_and_validates() {
        let text = r#"{
            "name": "shop",
            "tables": [
                {
                    "name": "orders",
                    "fields": [
                        {"name": "department_id", "kind": "integer"},
                        {"name": "description", "kind": "text", "max_len": 10},
                        {"name": "created_at", "kind": "timestamp"}
                    ],
                    "indices": [{"field": "description"}]
                },
                {
                    "name": "comments",
                    "fields": [
                        {"name": "order_id", "kind": "integer"},
                        {"name": "body", "kind": "text"}
                    ],
                    "indices": [{"field": "order_id", "strategy": "hash"}]
                }
            ]
        }"#;
        let schema = DatabaseSchema::from_json(text).expect("schema");
        assert_eq!(schema.name(), "shop");
        assert_eq!(schema.table("orders"), Some(&orders()));
        let comments = schema.table("comments").expect("comments");
        assert_eq!(
            comments.field("body").map(|field| field.kind.clone()),
            Some(FieldKind::Text { max_len: 255 })
        );

        let encoded = schema.to_json().expect("encode");
        let decoded = DatabaseSchema::from_json(&encoded).expect("decode");
        assert_eq!(decoded, schema);
    }

    #[test]
    fn schema_json_rejects_bad_index() {
        let text = r#"{"name": "shop", "tables": [
            {"name": "orders", "fields": [{"name": "a", "kind": "integer"}],
             "indices": [{"field": "missing"}]}
        ]}"#;
        let err = DatabaseSchema::from_json(text).expect_err("bad index");
        assert_eq!(err.kind(), ErrorKind::Schema);
    }

    #[test]
    fn duplicate_tables_are_rejected() {
        let err = DatabaseSchema::new("shop", vec![orders(), orders()]).expect_err("dup");
        assert_eq!(err.kind(), ErrorKind::Schema);
    }

    #[test]
    fn schema_file_name_cannot_be_a_table() {
        let err = TableSchema::builder("schema.json")
            .integer("a")
            .build()
            .expect_err("reserved");
        assert_eq!(err.kind(), ErrorKind::Schema);
        assert_eq!(err.table(), Some("schema.json"));

        let text = r#"{"name": "shop", "tables": [
            {"name": "schema.json", "fields": [{"name": "a", "kind": "integer"}]}
        ]}"#;
        let err = DatabaseSchema::from_json(text).expect_err("reserved");
        assert_eq!(err.kind(), ErrorKind::Schema);

        // Names that merely resemble it are still fine.
        TableSchema::builder("schema_json").integer("a").build().expect("similar name");
    }
}
