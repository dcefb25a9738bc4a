use std::io::Read;

use jiff::civil::Date;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

/// Schema files shipped with the crate, addressed by file name.
const EMBEDDED_SCHEMAS: &[(&str, &str)] = &[
    (
        "divida_ativa_fgts.csv",
        include_str!("../../schema/divida_ativa_fgts.csv"),
    ),
    (
        "divida_ativa_previdenciario.csv",
        include_str!("../../schema/divida_ativa_previdenciario.csv"),
    ),
    (
        "divida_ativa_nao_previdenciario.csv",
        include_str!("../../schema/divida_ativa_nao_previdenciario.csv"),
    ),
];

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Unknown schema {0:?}")]
    Unknown(String),
    #[error("Schema {0:?} has no fields")]
    Empty(String),
    #[error("Failed reading schema {name:?}: {source}")]
    Csv { name: String, source: csv::Error },
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Column {column:?}: cannot read {value:?} as {field_type}")]
pub struct CoerceError {
    pub column: String,
    pub value: String,
    pub field_type: FieldType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Integer,
    Decimal,
    Date,
    Bool,
}

impl FieldType {
    pub fn postgres_type(&self) -> &'static str {
        match self {
            FieldType::Text => "TEXT",
            FieldType::Integer => "BIGINT",
            FieldType::Decimal => "NUMERIC",
            FieldType::Date => "DATE",
            FieldType::Bool => "BOOLEAN",
        }
    }

    pub fn duckdb_type(&self) -> &'static str {
        match self {
            FieldType::Text => "VARCHAR",
            FieldType::Integer => "BIGINT",
            // widest DuckDB decimal, digits past the tenth decimal place are rounded
            FieldType::Decimal => "DECIMAL(38,10)",
            FieldType::Date => "DATE",
            FieldType::Bool => "BOOLEAN",
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Decimal => "decimal",
            FieldType::Date => "date",
            FieldType::Bool => "bool",
        };
        write!(f, "{}", s)
    }
}

/// A typed value ready to be handed to a destination.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Text(String),
    Integer(i64),
    Decimal(Decimal),
    Date(Date),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Field {
    #[serde(rename = "field_name")]
    pub name: String,
    #[serde(rename = "field_type")]
    pub field_type: FieldType,
}

impl Field {
    /// Convert a raw text value into a typed cell.  Empty strings stay empty
    /// for text columns and become null for every other type.
    pub fn coerce(&self, value: &str) -> Result<Cell, CoerceError> {
        let trimmed = value.trim();
        if trimmed.is_empty() && self.field_type != FieldType::Text {
            return Ok(Cell::Null);
        }
        let cell = match self.field_type {
            FieldType::Text => Some(Cell::Text(value.to_string())),
            FieldType::Integer => trimmed.parse::<i64>().ok().map(Cell::Integer),
            FieldType::Decimal => parse_decimal(trimmed).map(Cell::Decimal),
            FieldType::Date => parse_date(trimmed).map(Cell::Date),
            FieldType::Bool => parse_bool(trimmed).map(Cell::Bool),
        };
        cell.ok_or_else(|| CoerceError {
            column: self.name.clone(),
            value: value.to_string(),
            field_type: self.field_type,
        })
    }
}

/// Accepts `1234.56`, `1234,56` and `1.234,56`.
fn parse_decimal(s: &str) -> Option<Decimal> {
    let normalized = if s.contains(',') {
        s.replace('.', "").replace(',', ".")
    } else {
        s.to_string()
    };
    normalized.parse::<Decimal>().ok()
}

/// Dates come as `dd/mm/yyyy`, ISO dates are accepted too.
fn parse_date(s: &str) -> Option<Date> {
    Date::strptime("%d/%m/%Y", s)
        .ok()
        .or_else(|| s.parse::<Date>().ok())
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_uppercase().as_str() {
        "S" | "SIM" | "TRUE" | "T" | "1" => Some(true),
        "N" | "NAO" | "NÃO" | "FALSE" | "F" | "0" => Some(false),
        _ => None,
    }
}

/// Ordered list of destination columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub name: String,
    pub fields: Vec<Field>,
}

impl Schema {
    /// Load one of the schema files embedded in the crate.
    pub fn load(name: &str) -> Result<Schema, SchemaError> {
        let (_, content) = EMBEDDED_SCHEMAS
            .iter()
            .find(|(n, _)| *n == name)
            .ok_or_else(|| SchemaError::Unknown(name.to_string()))?;
        Schema::from_reader(name, content.as_bytes())
    }

    /// Read a schema from a CSV with a `field_name,field_type` header.
    pub fn from_reader<R: Read>(name: &str, reader: R) -> Result<Schema, SchemaError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let fields = rdr
            .deserialize::<Field>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| SchemaError::Csv {
                name: name.to_string(),
                source,
            })?;
        if fields.is_empty() {
            return Err(SchemaError::Empty(name.to_string()));
        }
        Ok(Schema {
            name: name.to_string(),
            fields,
        })
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}
