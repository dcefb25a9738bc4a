use std::collections::BTreeSet;
use std::fmt::Display;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use glob::Pattern;
use log::{debug, warn};
use thiserror::Error;
use zip::result::ZipError;
use zip::ZipArchive;

use super::table_config::TableConfig;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Invalid glob pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        source: glob::PatternError,
    },
    #[error("Failed listing archives: {0}")]
    Glob(#[from] glob::GlobError),
    #[error("Cannot read archive {path:?}: {source}")]
    Archive { path: PathBuf, source: ZipError },
    #[error("Cannot open archive {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A file inside an archive, as declared by the archive's central directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerFile {
    pub index: usize,
    pub name: String,
    /// Declared uncompressed size, not verified against the bytes read.
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedArchive {
    pub path: PathBuf,
    pub files: Vec<InnerFile>,
    /// Entries excluded by the inner file pattern.
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanWarning {
    NoMatchingFiles { archive: PathBuf, pattern: String },
}

impl Display for ScanWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanWarning::NoMatchingFiles { archive, pattern } => write!(
                f,
                "Cannot match inner files in {} (pattern {:?})",
                archive.display(),
                pattern
            ),
        }
    }
}

/// Result of scanning a source directory for one table.
#[derive(Debug, Default)]
pub struct Scan {
    pub archives: Vec<ScannedArchive>,
    pub warnings: Vec<ScanWarning>,
}

impl Scan {
    pub fn total_size(&self) -> u64 {
        self.archives.iter().map(|a| total_size(&a.files)).sum()
    }

    pub fn skipped(&self) -> usize {
        self.archives.iter().map(|a| a.skipped).sum()
    }

    pub fn file_count(&self) -> usize {
        self.archives.iter().map(|a| a.files.len()).sum()
    }
}

/// Sum of the declared uncompressed sizes.
pub fn total_size(files: &[InnerFile]) -> u64 {
    files.iter().map(|f| f.size).sum()
}

pub struct Scanner<'a> {
    config: &'a TableConfig,
    inner_pattern: Option<Pattern>,
    warnings: Vec<ScanWarning>,
}

impl<'a> Scanner<'a> {
    pub fn new(config: &'a TableConfig) -> Result<Scanner<'a>, ScanError> {
        let inner_pattern = match &config.inner_file_pattern {
            Some(p) => Some(Pattern::new(p).map_err(|source| ScanError::Pattern {
                pattern: p.clone(),
                source,
            })?),
            None => None,
        };
        Ok(Scanner {
            config,
            inner_pattern,
            warnings: Vec::new(),
        })
    }

    /// Archives in `directory` matching any of the configured patterns,
    /// sorted and without duplicates.  No match is not an error.
    pub fn resolve_archives(&self, directory: &Path) -> Result<Vec<PathBuf>, ScanError> {
        let base = Pattern::escape(&directory.to_string_lossy());
        let mut paths = BTreeSet::new();
        for pattern in &self.config.archive_name_patterns {
            let full_pattern = format!("{}/{}", base, pattern);
            let entries = glob::glob(&full_pattern).map_err(|source| ScanError::Pattern {
                pattern: pattern.clone(),
                source,
            })?;
            for entry in entries {
                let path = entry?;
                if path.is_file() {
                    paths.insert(path);
                } else {
                    debug!("Ignoring {:?}, not a file", path);
                }
            }
        }
        Ok(paths.into_iter().collect())
    }

    /// List the entries of one archive that should be loaded, in archive order.
    pub fn resolve_inner_files(&mut self, archive: &Path) -> Result<ScannedArchive, ScanError> {
        let file = File::open(archive).map_err(|source| ScanError::Io {
            path: archive.to_path_buf(),
            source,
        })?;
        let zip_error = |source| ScanError::Archive {
            path: archive.to_path_buf(),
            source,
        };
        let mut zip = ZipArchive::new(BufReader::new(file)).map_err(zip_error)?;

        let mut files = Vec::new();
        let mut entries = 0;
        for index in 0..zip.len() {
            let entry = zip.by_index_raw(index).map_err(zip_error)?;
            if entry.is_dir() {
                continue;
            }
            entries += 1;
            let name = entry.name().to_string();
            let matched = self
                .inner_pattern
                .as_ref()
                .map_or(true, |p| p.matches(&name));
            if matched {
                files.push(InnerFile {
                    index,
                    name,
                    size: entry.size(),
                });
            }
        }

        if files.is_empty() && entries > 0 {
            let warning = ScanWarning::NoMatchingFiles {
                archive: archive.to_path_buf(),
                pattern: self.config.inner_file_pattern.clone().unwrap_or_default(),
            };
            warn!("{}", warning);
            self.warnings.push(warning);
        }

        Ok(ScannedArchive {
            path: archive.to_path_buf(),
            skipped: entries - files.len(),
            files,
        })
    }

    pub fn warnings(&self) -> &[ScanWarning] {
        &self.warnings
    }

    /// Resolve the archives and their inner files in one go.
    pub fn scan(mut self, directory: &Path) -> Result<Scan, ScanError> {
        let mut archives = Vec::new();
        for path in self.resolve_archives(directory)? {
            archives.push(self.resolve_inner_files(&path)?);
        }
        Ok(Scan {
            archives,
            warnings: self.warnings,
        })
    }
}
