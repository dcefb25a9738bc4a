use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use log::{debug, info};
use thiserror::Error;
use zip::result::ZipError;
use zip::ZipArchive;

use super::destination::{CopyRequest, Destination, DestinationError, ProgressReader, StorageOptions};
use super::null_marker::NullMarking;
use super::scanner::{ScanError, ScanWarning, Scanner};
use super::table_config::TableConfig;
use crate::progress::{summary_line, ProgressObserver};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error("Failed dropping table {table}: {source}")]
    Drop {
        table: String,
        source: DestinationError,
    },
    #[error("Cannot read archive {path:?}: {source}")]
    Archive { path: PathBuf, source: ZipError },
    #[error("Cannot open archive {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed importing {file} from {archive:?} into {table}: {source}")]
    Destination {
        table: String,
        archive: PathBuf,
        file: String,
        source: DestinationError,
    },
}

impl LoadError {
    /// The archive being processed when the error happened, if any.
    pub fn archive_path(&self) -> Option<&Path> {
        match self {
            LoadError::Scan(ScanError::Archive { path, .. })
            | LoadError::Scan(ScanError::Io { path, .. })
            | LoadError::Archive { path, .. }
            | LoadError::Io { path, .. }
            | LoadError::Destination { archive: path, .. } => Some(path.as_path()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    /// Drop the destination table before loading.
    pub drop_existing: bool,
    pub unlogged: bool,
    pub storage_method: Option<String>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            drop_existing: true,
            unlogged: false,
            storage_method: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    pub table: String,
    pub rows_imported: u64,
    pub archives: usize,
    pub files_loaded: usize,
    pub entries_skipped: usize,
    /// Declared uncompressed size of the loaded files.
    pub total_bytes: u64,
    pub warnings: Vec<ScanWarning>,
}

impl TableConfig {
    /// Load every matching file of the archives in `directory` into the
    /// destination table.  Stops at the first archive or destination error,
    /// rows already copied stay in the table.
    pub fn load(
        &self,
        directory: &Path,
        destination: &mut dyn Destination,
        options: &LoadOptions,
        progress: &mut dyn ProgressObserver,
    ) -> Result<LoadSummary, LoadError> {
        if options.drop_existing {
            progress.set_message(&format!("Dropping {}", self.name));
            destination
                .drop_table(&self.name)
                .map_err(|source| LoadError::Drop {
                    table: self.name.clone(),
                    source,
                })?;
        }

        // Size everything up front so the progress total is known before copying
        progress.set_message(&format!("Importing {} (calculating size)", self.name));
        let scan = Scanner::new(self)?.scan(directory)?;
        let total_bytes = scan.total_size();
        progress.set_total(total_bytes);
        info!(
            "{}: {} archive(s), {} file(s), {} bytes uncompressed",
            self.name,
            scan.archives.len(),
            scan.file_count(),
            total_bytes
        );

        let storage = StorageOptions {
            unlogged: options.unlogged,
            storage_method: options.storage_method.clone(),
        };
        let request = CopyRequest {
            table: &self.name,
            schema: &self.schema,
            encoding: self.encoding,
            dialect: self.dialect,
            has_header: self.has_header,
            storage: &storage,
        };

        let n_archives = scan.archives.len();
        let mut rows_imported = 0;
        let mut files_loaded = 0;
        for (counter, archive) in scan.archives.iter().enumerate() {
            progress.set_message(&format!(
                "Importing {} (ZIP {}/{})",
                self.name,
                counter + 1,
                n_archives
            ));
            if archive.files.is_empty() {
                continue;
            }
            let file = File::open(&archive.path).map_err(|source| LoadError::Io {
                path: archive.path.clone(),
                source,
            })?;
            let mut zip = ZipArchive::new(BufReader::new(file)).map_err(|source| {
                LoadError::Archive {
                    path: archive.path.clone(),
                    source,
                }
            })?;

            for inner in &archive.files {
                progress.set_message(&format!(
                    "Importing {} (ZIP {}/{}: {})",
                    self.name,
                    counter + 1,
                    n_archives,
                    inner.name
                ));
                let entry = zip.by_index(inner.index).map_err(|source| LoadError::Archive {
                    path: archive.path.clone(),
                    source,
                })?;
                // count raw entry bytes, the total is the sum of declared entry sizes
                let mut advance = |bytes: u64| progress.advance(bytes);
                let mut reader =
                    NullMarking::new(ProgressReader::new(entry, &mut advance), self.dialect);
                let result = destination
                    .copy_from_reader(&mut reader, &request)
                    .map_err(|source| LoadError::Destination {
                        table: self.name.clone(),
                        archive: archive.path.clone(),
                        file: inner.name.clone(),
                        source,
                    })?;
                debug!(
                    "{}: {} rows from {}:{}",
                    self.name,
                    result.rows_imported,
                    archive.path.display(),
                    inner.name
                );
                rows_imported += result.rows_imported;
                files_loaded += 1;
            }
        }

        let summary = summary_line(&self.name, rows_imported);
        progress.finish(&summary);
        info!("{}", summary);

        Ok(LoadSummary {
            table: self.name.clone(),
            rows_imported,
            archives: n_archives,
            files_loaded,
            entries_skipped: scan.skipped(),
            total_bytes,
            warnings: scan.warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::db::destination::{CopyResult, DuckDbDestination};
    use crate::db::scanner::tests::write_zip;
    use crate::db::schema::Schema;

    /// Remembers every update, to check what a load reported.
    #[derive(Default)]
    struct Recorder {
        messages: Vec<String>,
        total: Option<u64>,
        advanced: u64,
        finished: Option<String>,
    }

    impl ProgressObserver for Recorder {
        fn set_message(&mut self, message: &str) {
            self.messages.push(message.to_string());
        }
        fn set_total(&mut self, total: u64) {
            assert_eq!(self.advanced, 0, "total must be set before copying");
            self.total = Some(total);
        }
        fn advance(&mut self, bytes: u64) {
            self.advanced += bytes;
        }
        fn finish(&mut self, message: &str) {
            self.finished = Some(message.to_string());
        }
    }

    /// Records calls instead of writing anywhere.
    #[derive(Default)]
    struct FakeDestination {
        calls: Vec<String>,
    }

    impl Destination for FakeDestination {
        fn drop_table(&mut self, table: &str) -> Result<(), DestinationError> {
            self.calls.push(format!("drop {}", table));
            Ok(())
        }

        fn copy_from_reader(
            &mut self,
            reader: &mut dyn std::io::Read,
            request: &CopyRequest<'_>,
        ) -> Result<CopyResult, DestinationError> {
            let mut content = String::new();
            reader.read_to_string(&mut content)?;
            self.calls.push(format!(
                "copy {} unlogged={} method={:?}",
                request.table, request.storage.unlogged, request.storage.storage_method
            ));
            let lines = content.lines().count() as u64;
            Ok(CopyResult {
                rows_imported: lines - u64::from(request.has_header),
            })
        }
    }

    fn config() -> Result<TableConfig, Box<dyn Error>> {
        let schema = Schema::from_reader(
            "t.csv",
            "field_name,field_type\nname,text\nqty,integer\n".as_bytes(),
        )?;
        Ok(TableConfig::with_schema("items", &["*.zip"], true, schema).inner_file_pattern("*.csv"))
    }

    fn fixture() -> Result<TempDir, Box<dyn Error>> {
        let dir = TempDir::new()?;
        write_zip(
            &dir.path().join("A.zip"),
            &[("a.csv", "name;qty\nx;1\ny;\nz;3\n"), ("b.txt", "not csv")],
        )?;
        Ok(dir)
    }

    #[test]
    fn load_skips_excluded_entries() -> Result<(), Box<dyn Error>> {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = fixture()?;
        let config = config()?;
        let mut destination = DuckDbDestination::in_memory()?;
        let mut progress = Recorder::default();
        let summary = config.load(
            dir.path(),
            &mut destination,
            &LoadOptions::default(),
            &mut progress,
        )?;
        assert_eq!(summary.rows_imported, 3);
        assert_eq!(summary.entries_skipped, 1);
        assert_eq!(summary.files_loaded, 1);
        assert!(summary.warnings.is_empty());
        assert_eq!(destination.row_count("items")?, 3);

        assert_eq!(progress.total, Some(20));
        assert_eq!(progress.advanced, 20);
        assert_eq!(progress.finished.as_deref(), Some("[items] 3 rows imported"));
        assert_eq!(progress.messages[0], "Dropping items");
        assert_eq!(progress.messages[1], "Importing items (calculating size)");
        assert!(progress
            .messages
            .contains(&"Importing items (ZIP 1/1: a.csv)".to_string()));
        Ok(())
    }

    #[test]
    fn drop_existing_is_idempotent() -> Result<(), Box<dyn Error>> {
        let dir = fixture()?;
        let config = config()?;
        let mut destination = DuckDbDestination::in_memory()?;
        let options = LoadOptions::default();
        let first = config.load(dir.path(), &mut destination, &options, &mut Recorder::default())?;
        let second = config.load(dir.path(), &mut destination, &options, &mut Recorder::default())?;
        assert_eq!(first.rows_imported, second.rows_imported);
        assert_eq!(destination.row_count("items")?, 3);
        Ok(())
    }

    #[test]
    fn append_doubles_rows() -> Result<(), Box<dyn Error>> {
        let dir = fixture()?;
        let config = config()?;
        let mut destination = DuckDbDestination::in_memory()?;
        let options = LoadOptions {
            drop_existing: false,
            ..LoadOptions::default()
        };
        config.load(dir.path(), &mut destination, &options, &mut Recorder::default())?;
        let first = destination.row_count("items")?;
        config.load(dir.path(), &mut destination, &options, &mut Recorder::default())?;
        assert_eq!(destination.row_count("items")?, 2 * first);
        Ok(())
    }

    #[test]
    fn no_archives_loads_nothing() -> Result<(), Box<dyn Error>> {
        let dir = TempDir::new()?;
        let config = config()?;
        let mut destination = FakeDestination::default();
        let mut progress = Recorder::default();
        let summary = config.load(
            dir.path(),
            &mut destination,
            &LoadOptions::default(),
            &mut progress,
        )?;
        assert_eq!(summary.rows_imported, 0);
        assert_eq!(summary.archives, 0);
        assert_eq!(progress.total, Some(0));
        assert_eq!(progress.finished.as_deref(), Some("[items] 0 rows imported"));
        assert_eq!(destination.calls, vec!["drop items"]);
        Ok(())
    }

    #[test]
    fn corrupt_archive_aborts() -> Result<(), Box<dyn Error>> {
        let dir = fixture()?;
        write_zip(&dir.path().join("C.zip"), &[("c.csv", "name;qty\nw;4\n")])?;
        let bad = dir.path().join("B.zip");
        fs::write(&bad, b"PK\x03\x04 truncated")?;
        let config = config()?;
        let mut destination = FakeDestination::default();
        let err = config
            .load(
                dir.path(),
                &mut destination,
                &LoadOptions::default(),
                &mut Recorder::default(),
            )
            .unwrap_err();
        assert_eq!(err.archive_path(), Some(bad.as_path()));
        assert!(err.to_string().contains("B.zip"));
        // nothing is copied, archives are all opened before loading starts
        assert_eq!(destination.calls, vec!["drop items"]);
        Ok(())
    }

    #[test]
    fn options_reach_the_destination() -> Result<(), Box<dyn Error>> {
        let dir = fixture()?;
        write_zip(&dir.path().join("B.zip"), &[("readme.txt", "hi")])?;
        let config = config()?;
        let mut destination = FakeDestination::default();
        let options = LoadOptions {
            drop_existing: false,
            unlogged: true,
            storage_method: Some("heap".to_string()),
        };
        let summary = config.load(dir.path(), &mut destination, &options, &mut Recorder::default())?;
        assert_eq!(
            destination.calls,
            vec![r#"copy items unlogged=true method=Some("heap")"#]
        );
        assert_eq!(summary.rows_imported, 3);
        assert_eq!(summary.warnings.len(), 1);
        assert_eq!(summary.entries_skipped, 2);
        Ok(())
    }

    #[test]
    fn progress_counts_raw_bytes() -> Result<(), Box<dyn Error>> {
        let dir = TempDir::new()?;
        let mut csv = String::from("a;b;c;d\n");
        csv.push_str(&";;;\n".repeat(1000));
        write_zip(&dir.path().join("A.zip"), &[("empty.csv", csv.as_str())])?;
        let schema = Schema::from_reader(
            "t.csv",
            "field_name,field_type\na,text\nb,integer\nc,date\nd,decimal\n".as_bytes(),
        )?;
        let config = TableConfig::with_schema("sparse", &["*.zip"], true, schema);
        let mut destination = DuckDbDestination::in_memory()?;
        let mut progress = Recorder::default();
        let summary = config.load(
            dir.path(),
            &mut destination,
            &LoadOptions::default(),
            &mut progress,
        )?;
        assert_eq!(summary.rows_imported, 1000);
        assert_eq!(progress.total, Some(csv.len() as u64));
        assert_eq!(progress.advanced, csv.len() as u64);
        Ok(())
    }

    #[test]
    fn rejected_file_aborts() -> Result<(), Box<dyn Error>> {
        let dir = TempDir::new()?;
        write_zip(&dir.path().join("A.zip"), &[("a.csv", "name;qty\nx;1;extra\n")])?;
        let config = config()?;
        let mut destination = DuckDbDestination::in_memory()?;
        let err = config
            .load(
                dir.path(),
                &mut destination,
                &LoadOptions::default(),
                &mut Recorder::default(),
            )
            .unwrap_err();
        match err {
            LoadError::Destination { table, file, .. } => {
                assert_eq!(table, "items");
                assert_eq!(file, "a.csv");
            }
            e => panic!("unexpected error {e}"),
        }
        Ok(())
    }
}
