//! Bulk-copy destinations.  A destination knows how to drop a table and how
//! to copy a CSV byte stream into it.

pub mod duckdb_copy;
pub mod postgres_copy;

use std::io::{self, Read};

use thiserror::Error;

use super::schema::{CoerceError, FieldType, Schema};
use super::table_config::{DecodeError, Dialect, Encoding};

pub use duckdb_copy::DuckDbDestination;
pub use postgres_copy::PostgresDestination;

#[derive(Error, Debug)]
pub enum DestinationError {
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] postgres::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Header has {found} columns, schema {schema:?} has {expected}")]
    HeaderMismatch {
        schema: String,
        expected: usize,
        found: usize,
    },
    #[error("Line {line}: expected {expected} columns, found {found}")]
    ColumnCount {
        line: u64,
        expected: usize,
        found: usize,
    },
    #[error("Line {line}: {source}")]
    Coerce { line: u64, source: CoerceError },
    #[error("Line {line}, column {column:?}: {source}")]
    Decode {
        line: u64,
        column: String,
        source: DecodeError,
    },
}

/// Table creation hints passed through to the destination.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageOptions {
    /// Create the table without write-ahead logging.
    pub unlogged: bool,
    /// Table access method, e.g. `heap`.
    pub storage_method: Option<String>,
}

/// Everything a destination needs to know to copy one file.
#[derive(Debug, Clone, Copy)]
pub struct CopyRequest<'a> {
    pub table: &'a str,
    pub schema: &'a Schema,
    pub encoding: Encoding,
    pub dialect: Dialect,
    pub has_header: bool,
    pub storage: &'a StorageOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CopyResult {
    pub rows_imported: u64,
}

pub trait Destination {
    fn drop_table(&mut self, table: &str) -> Result<(), DestinationError>;

    /// Create the table if needed and copy all rows of `reader` into it.
    /// `reader` is read to the end; progress is reported by the reader itself.
    fn copy_from_reader(
        &mut self,
        reader: &mut dyn Read,
        request: &CopyRequest<'_>,
    ) -> Result<CopyResult, DestinationError>;
}

/// Open a destination from a connection string.  `postgres://` and
/// `postgresql://` URLs go to PostgreSQL, anything else is a DuckDB path.
pub fn connect(url: &str) -> Result<Box<dyn Destination>, DestinationError> {
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        Ok(Box::new(PostgresDestination::connect(url)?))
    } else {
        Ok(Box::new(DuckDbDestination::open(url)?))
    }
}

/// Reports the number of bytes read through it.  Wrap the raw source, not
/// the null-marked stream, so the count matches the declared entry sizes.
pub struct ProgressReader<'a, R> {
    inner: R,
    callback: &'a mut dyn FnMut(u64),
}

impl<'a, R: Read> ProgressReader<'a, R> {
    pub fn new(inner: R, callback: &'a mut dyn FnMut(u64)) -> Self {
        ProgressReader { inner, callback }
    }
}

impl<R: Read> Read for ProgressReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            (self.callback)(n as u64);
        }
        Ok(n)
    }
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Column list for `CREATE TABLE`, e.g. `"a" TEXT, "b" BIGINT`.
pub(crate) fn column_definitions(schema: &Schema, sql_type: fn(&FieldType) -> &'static str) -> String {
    schema
        .fields
        .iter()
        .map(|f| format!("{} {}", quote_identifier(&f.name), sql_type(&f.field_type)))
        .collect::<Vec<_>>()
        .join(", ")
}
