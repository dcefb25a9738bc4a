use std::io::{self, Read};

use log::debug;
use postgres::{Client, NoTls};

use super::{
    column_definitions, quote_identifier, CopyRequest, CopyResult, Destination,
    DestinationError,
};
use crate::db::schema::FieldType;

/// Streams files straight into `COPY ... FROM STDIN`; parsing, decoding and
/// type conversion happen on the server.
pub struct PostgresDestination {
    client: Client,
}

impl PostgresDestination {
    pub fn connect(url: &str) -> Result<PostgresDestination, DestinationError> {
        let client = Client::connect(url, NoTls)?;
        Ok(PostgresDestination { client })
    }
}

fn sql_literal(c: u8) -> String {
    let c = c as char;
    if c == '\'' {
        "''''".to_string()
    } else {
        format!("'{}'", c)
    }
}

pub(crate) fn create_table_sql(request: &CopyRequest<'_>) -> String {
    let mut sql = format!(
        "CREATE {}TABLE IF NOT EXISTS {} ({})",
        if request.storage.unlogged { "UNLOGGED " } else { "" },
        quote_identifier(request.table),
        column_definitions(request.schema, FieldType::postgres_type)
    );
    if let Some(method) = &request.storage.storage_method {
        sql.push_str(&format!(" USING {}", method));
    }
    sql
}

pub(crate) fn copy_sql(request: &CopyRequest<'_>) -> String {
    let columns = request
        .schema
        .column_names()
        .map(quote_identifier)
        .collect::<Vec<_>>()
        .join(", ");
    // FORCE_NULL: a quoted `\N` is null too, as in the DuckDB destination
    format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT csv, DELIMITER {}, QUOTE {}, NULL '\\N', FORCE_NULL ({}), HEADER {}, ENCODING '{}')",
        quote_identifier(request.table),
        columns,
        columns,
        sql_literal(request.dialect.delimiter),
        sql_literal(request.dialect.quote),
        request.has_header,
        request.encoding.postgres_name()
    )
}

impl Destination for PostgresDestination {
    fn drop_table(&mut self, table: &str) -> Result<(), DestinationError> {
        self.client
            .batch_execute(&format!("DROP TABLE IF EXISTS {}", quote_identifier(table)))?;
        Ok(())
    }

    fn copy_from_reader(
        &mut self,
        reader: &mut dyn Read,
        request: &CopyRequest<'_>,
    ) -> Result<CopyResult, DestinationError> {
        self.client.batch_execute(&create_table_sql(request))?;
        // source dates are dd/mm/yyyy
        self.client.batch_execute("SET datestyle TO 'ISO, DMY'")?;

        let sql = copy_sql(request);
        debug!("{}", sql);
        let mut writer = self.client.copy_in(sql.as_str())?;
        io::copy(reader, &mut writer)?;
        let rows = writer.finish()?;

        Ok(CopyResult {
            rows_imported: rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::error::Error;

    use super::*;
    use crate::db::destination::StorageOptions;
    use crate::db::null_marker::NullMarking;
    use crate::db::schema::Schema;
    use crate::db::table_config::{Dialect, Encoding};

    fn schema() -> Result<Schema, Box<dyn Error>> {
        Ok(Schema::from_reader(
            "test.csv",
            "field_name,field_type\nname,text\nqty,integer\n".as_bytes(),
        )?)
    }

    #[test]
    fn statements() -> Result<(), Box<dyn Error>> {
        let schema = schema()?;
        let storage = StorageOptions {
            unlogged: true,
            storage_method: Some("heap".to_string()),
        };
        let request = CopyRequest {
            table: "items",
            schema: &schema,
            encoding: Encoding::Iso8859_15,
            dialect: Dialect::EXCEL_SEMICOLON,
            has_header: true,
            storage: &storage,
        };
        assert_eq!(
            create_table_sql(&request),
            r#"CREATE UNLOGGED TABLE IF NOT EXISTS "items" ("name" TEXT, "qty" BIGINT) USING heap"#
        );
        assert_eq!(
            copy_sql(&request),
            r#"COPY "items" ("name", "qty") FROM STDIN WITH (FORMAT csv, DELIMITER ';', QUOTE '"', NULL '\N', FORCE_NULL ("name", "qty"), HEADER true, ENCODING 'LATIN9')"#
        );
        Ok(())
    }

    /// Needs a running server, e.g. `TEST_DATABASE_URL=postgres://postgres@localhost/test`
    #[ignore]
    #[test]
    fn copy_rows() -> Result<(), Box<dyn Error>> {
        let url = env::var("TEST_DATABASE_URL")?;
        let schema = schema()?;
        let storage = StorageOptions::default();
        let request = CopyRequest {
            table: "test_items",
            schema: &schema,
            encoding: Encoding::Utf8,
            dialect: Dialect::EXCEL_SEMICOLON,
            has_header: true,
            storage: &storage,
        };
        let mut destination = PostgresDestination::connect(&url)?;
        destination.drop_table("test_items")?;
        let mut reader = NullMarking::new(
            "name;qty\na;1\nb;\n\"\\N\";3\n".as_bytes(),
            request.dialect,
        );
        let result = destination.copy_from_reader(&mut reader, &request)?;
        assert_eq!(result.rows_imported, 3);
        let row = destination
            .client
            .query_one("SELECT count(*) FROM test_items WHERE name IS NULL", &[])?;
        assert_eq!(row.get::<_, i64>(0), 1);
        destination.drop_table("test_items")?;
        Ok(())
    }
}
