use std::time::Duration;

use duckdb::{AccessMode, Config, Connection};
use log::debug;

/// Open a DuckDB database, retrying with exponential backoff while another
/// process holds the file lock.
/// Suggested `max_attempts = 8`, `initial_wait = Duration::from_millis(25)`.
pub fn open_with_retry(
    duckdb_path: &str,
    max_attempts: u32,
    initial_wait: Duration,
    access_mode: AccessMode,
) -> Result<Connection, duckdb::Error> {
    let mut attempts = 0;
    let mut wait_duration = initial_wait;

    loop {
        // `AccessMode` does not implement `Clone` in duckdb 1.3.2.
        let mode = match access_mode {
            AccessMode::Automatic => AccessMode::Automatic,
            AccessMode::ReadOnly => AccessMode::ReadOnly,
            AccessMode::ReadWrite => AccessMode::ReadWrite,
        };
        let config = Config::default().access_mode(mode)?;
        match Connection::open_with_flags(duckdb_path, config) {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                attempts += 1;
                if attempts >= max_attempts {
                    return Err(e);
                }
                debug!(
                    "Retrying DuckDB open of {} after error: {} (attempt {}/{})",
                    duckdb_path, e, attempts, max_attempts
                );
                std::thread::sleep(wait_duration);
                wait_duration *= 2;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn open_new_database() -> Result<(), Box<dyn Error>> {
        let dir = TempDir::new()?;
        let path = dir.path().join("test.duckdb");
        let conn = open_with_retry(
            &path.to_string_lossy(),
            2,
            Duration::from_millis(1),
            AccessMode::ReadWrite,
        )?;
        let n: i64 = conn.query_row("SELECT 40 + 2", [], |row| row.get(0))?;
        assert_eq!(n, 42);
        Ok(())
    }

    #[test]
    fn read_only_missing_file_fails() -> Result<(), Box<dyn Error>> {
        let dir = TempDir::new()?;
        let path = dir.path().join("missing.duckdb");
        let res = open_with_retry(
            &path.to_string_lossy(),
            2,
            Duration::from_millis(1),
            AccessMode::ReadOnly,
        );
        assert!(res.is_err());
        Ok(())
    }
}
