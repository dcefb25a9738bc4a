use std::io::Read;
use std::time::Duration;

use csv::ByteRecord;
use duckdb::types::Value;
use duckdb::{appender_params_from_iter, AccessMode, Connection};
use log::{debug, warn};

use super::{
    column_definitions, quote_identifier, CopyRequest, CopyResult, Destination,
    DestinationError,
};
use crate::db::null_marker::NULL_MARKER;
use crate::db::schema::{Cell, FieldType};
use crate::utils::lib_duckdb::open_with_retry;

/// DuckDB has no `COPY FROM STDIN`, so rows are parsed here and pushed
/// through the appender.
pub struct DuckDbDestination {
    conn: Connection,
}

impl DuckDbDestination {
    pub fn open(duckdb_path: &str) -> Result<DuckDbDestination, DestinationError> {
        let conn = open_with_retry(
            duckdb_path,
            8,
            Duration::from_millis(25),
            AccessMode::ReadWrite,
        )?;
        Ok(DuckDbDestination { conn })
    }

    pub fn in_memory() -> Result<DuckDbDestination, DestinationError> {
        Ok(DuckDbDestination {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn row_count(&self, table: &str) -> Result<u64, DestinationError> {
        let sql = format!("SELECT count(*) FROM {}", quote_identifier(table));
        let n: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(n as u64)
    }
}

fn to_value(cell: Cell) -> Value {
    match cell {
        Cell::Null => Value::Null,
        Cell::Text(s) => Value::Text(s),
        Cell::Integer(n) => Value::BigInt(n),
        // the appender casts these to the DECIMAL and DATE columns
        Cell::Decimal(d) => Value::Text(d.to_string()),
        Cell::Date(d) => Value::Text(d.to_string()),
        Cell::Bool(b) => Value::Boolean(b),
    }
}

impl Destination for DuckDbDestination {
    fn drop_table(&mut self, table: &str) -> Result<(), DestinationError> {
        self.conn
            .execute_batch(&format!("DROP TABLE IF EXISTS {};", quote_identifier(table)))?;
        Ok(())
    }

    fn copy_from_reader(
        &mut self,
        reader: &mut dyn Read,
        request: &CopyRequest<'_>,
    ) -> Result<CopyResult, DestinationError> {
        let schema = request.schema;
        if request.storage.unlogged {
            warn!("DuckDB has no unlogged tables, creating {} as a regular table", request.table);
        }
        if let Some(method) = &request.storage.storage_method {
            debug!("Ignoring storage method {:?} for DuckDB", method);
        }
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} ({});",
            quote_identifier(request.table),
            column_definitions(schema, FieldType::duckdb_type)
        ))?;

        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(request.dialect.delimiter)
            .quote(request.dialect.quote)
            .has_headers(request.has_header)
            .flexible(true)
            .from_reader(reader);
        if request.has_header {
            let found = rdr.byte_headers()?.len();
            if found != schema.len() {
                return Err(DestinationError::HeaderMismatch {
                    schema: schema.name.clone(),
                    expected: schema.len(),
                    found,
                });
            }
        }

        let mut appender = self.conn.appender(request.table)?;
        let mut record = ByteRecord::new();
        let mut rows = 0;
        while rdr.read_byte_record(&mut record)? {
            let line = record.position().map_or(0, |p| p.line());
            if record.len() != schema.len() {
                return Err(DestinationError::ColumnCount {
                    line,
                    expected: schema.len(),
                    found: record.len(),
                });
            }
            let mut values = Vec::with_capacity(schema.len());
            for (field, raw) in schema.fields.iter().zip(record.iter()) {
                // quoted or not, matching FORCE_NULL on PostgreSQL
                if raw == NULL_MARKER {
                    values.push(Value::Null);
                    continue;
                }
                let text = request
                    .encoding
                    .decode(raw)
                    .map_err(|source| DestinationError::Decode {
                        line,
                        column: field.name.clone(),
                        source,
                    })?;
                let cell = field
                    .coerce(&text)
                    .map_err(|source| DestinationError::Coerce { line, source })?;
                values.push(to_value(cell));
            }
            appender.append_row(appender_params_from_iter(values))?;
            rows += 1;
        }
        appender.flush()?;
        debug!("Appended {} rows to {}", rows, request.table);

        Ok(CopyResult {
            rows_imported: rows,
        })
    }
}
