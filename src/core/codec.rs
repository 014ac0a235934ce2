// Row codec: a row unit is two JSON lines, field names then values, in table order.
use serde_json::Value as JsonValue;

use crate::core::error::{Error, ErrorKind};
use crate::core::schema::{Field, TableSchema};
use crate::core::value::{Attributes, Row, RowId, Value};

#[derive(Clone, Debug)]
pub struct RowCodec {
    table: String,
    id_field: String,
    fields: Vec<Field>,
}

impl RowCodec {
    pub fn new(table: &TableSchema) -> Self {
        Self {
            table: table.name().to_string(),
            id_field: table.id_field().to_string(),
            fields: table.fields().to_vec(),
        }
    }

    /// Encodes `values` in field order; fields without a value are written as `null`.
    pub fn encode(&self, values: &Attributes) -> Result<String, Error> {
        let header = self
            .fields
            .iter()
            .map(|field| JsonValue::from(field.name.as_str()))
            .collect::<Vec<_>>();
        let mut row = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let value = match values.get(&field.name) {
                Some(value) => value.to_json()?,
                None => JsonValue::Null,
            };
            row.push(value);
        }

        let mut out = self.to_line(&header)?;
        out.push('\n');
        out.push_str(&self.to_line(&row)?);
        out.push('\n');
        Ok(out)
    }

    pub fn decode(&self, text: &str) -> Result<Row, Error> {
        let mut lines = text.lines();
        let header: Vec<String> = self.parse_line(lines.next(), "header")?;
        let row: Vec<JsonValue> = self.parse_line(lines.next(), "values")?;
        if header.len() != row.len() {
            return Err(self.corrupt("header and value counts differ"));
        }

        let mut values = Attributes::new();
        for (name, json) in header.into_iter().zip(row) {
            let field = self
                .fields
                .iter()
                .find(|field| field.name == name)
                .ok_or_else(|| self.corrupt("row names an unknown field").with_field(&name))?;
            let value = Value::from_json(&field.kind, &json).map_err(|err| {
                self.corrupt(err.message().unwrap_or("value does not match field kind"))
                    .with_field(&name)
            })?;
            if let Some(value) = value {
                values.insert(name, value);
            }
        }

        let id = match values.get(&self.id_field) {
            Some(Value::Int(id)) if *id > 0 => *id as RowId,
            _ => return Err(self.corrupt("row has no valid identifier")),
        };
        Ok(Row::new(id, values))
    }

    fn to_line(&self, items: &[JsonValue]) -> Result<String, Error> {
        serde_json::to_string(items).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode row")
                .with_table(&self.table)
                .with_source(err)
        })
    }

    fn parse_line<T: serde::de::DeserializeOwned>(
        &self,
        line: Option<&str>,
        what: &str,
    ) -> Result<T, Error> {
        let line = line.ok_or_else(|| self.corrupt(&format!("row {what} line missing")))?;
        serde_json::from_str(line)
            .map_err(|err| self.corrupt(&format!("row {what} line is malformed")).with_source(err))
    }

    fn corrupt(&self, message: &str) -> Error {
        Error::new(ErrorKind::Corrupt)
            .with_message(message)
            .with_table(&self.table)
    }
}
