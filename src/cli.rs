use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use itertools::Itertools;
use log::info;
use tabled::{builder::Builder, settings::Style};
use thiserror::Error;
use url::Url;

use crate::api::pgfn::{self, LinkList, ListingError, LISTING_URL};
use crate::db::destination::{self, DestinationError};
use crate::db::loader::{LoadError, LoadOptions, LoadSummary};
use crate::db::registry::{RegistryError, TableRegistry};
use crate::db::table_config::TableConfig;
use crate::progress::progress_for_terminal;
use crate::quarter::{Quarter, QuarterError};
use crate::utils::downloader::{Download, DownloadError, DownloaderKind};

pub const DEFAULT_DOWNLOAD_PATH: &str = "data/download";

#[derive(Parser, Debug)]
#[command(version, about = "Download and import the PGFN divida ativa open data", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download the files of a quarterly release
    Download {
        /// Quarter to download instead of the latest one, formatted `YYYY-Q`
        #[arg(long)]
        quarter: Option<String>,

        /// A `YYYY-Q` folder is created in here for the release files
        #[arg(long, default_value = DEFAULT_DOWNLOAD_PATH)]
        base_download_path: PathBuf,

        #[arg(long, value_enum, default_value_t = DownloaderKind::Aria2c)]
        downloader: DownloaderKind,

        /// Listing page with one folder per release
        #[arg(long, default_value = LISTING_URL)]
        url: String,
    },

    /// Import a downloaded release into the database
    Import {
        /// Quarter to import instead of the latest downloaded one, formatted `YYYY-Q`
        #[arg(long)]
        quarter: Option<String>,

        /// Folder holding one `YYYY-Q` folder per downloaded release
        #[arg(long, default_value = DEFAULT_DOWNLOAD_PATH)]
        base_download_path: PathBuf,

        /// PostgreSQL url (`postgres://...`) or DuckDB file path
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,

        /// Create the tables as unlogged (PostgreSQL)
        #[arg(long)]
        unlogged: bool,

        /// Table access method (PostgreSQL)
        #[arg(long, default_value = "heap")]
        access_method: String,

        /// Keep existing tables and append to them
        #[arg(long)]
        no_drop: bool,

        /// Only import these tables (all by default)
        #[arg(long = "table")]
        tables: Vec<String>,
    },
}

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    InvalidQuarter(#[from] QuarterError),
    #[error("Quarter not found: {quarter:?} (options: {options})")]
    QuarterNotFound { quarter: String, options: String },
    #[error("No downloaded data found in {0:?}")]
    NoDownloadedData(PathBuf),
    #[error("Download directory does not exist: {0:?}")]
    MissingDownloadDir(PathBuf),
    #[error("Unknown table {name:?} (options: {options})")]
    UnknownTable { name: String, options: String },
    #[error(transparent)]
    Listing(#[from] ListingError),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error(transparent)]
    Destination(#[from] DestinationError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("I/O error in {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::InvalidQuarter(_) => 1,
            CliError::QuarterNotFound { .. } => 2,
            CliError::NoDownloadedData(_) => 3,
            CliError::MissingDownloadDir(_) => 4,
            CliError::UnknownTable { .. } => 6,
            _ => 5,
        }
    }
}

fn validate_quarter(quarter: Option<&str>) -> Result<Option<Quarter>, CliError> {
    Ok(quarter.map(|q| q.parse::<Quarter>()).transpose()?)
}

/// Pick the requested release, or the latest one.
pub fn select_release(
    releases: &BTreeMap<Quarter, Url>,
    requested: Option<&str>,
) -> Result<(Quarter, Url), CliError> {
    let options = || releases.keys().join(", ");
    match validate_quarter(requested)? {
        Some(quarter) => releases
            .get(&quarter)
            .map(|url| (quarter, url.clone()))
            .ok_or_else(|| CliError::QuarterNotFound {
                quarter: quarter.to_string(),
                options: options(),
            }),
        None => releases
            .iter()
            .next_back()
            .map(|(q, url)| (*q, url.clone()))
            .ok_or_else(|| CliError::QuarterNotFound {
                quarter: "latest".to_string(),
                options: options(),
            }),
    }
}

/// The latest `YYYY-Q` folder in `base`.
pub fn latest_downloaded(base: &Path) -> Result<Quarter, CliError> {
    let entries = match fs::read_dir(base) {
        Ok(entries) => entries,
        Err(_) => return Err(CliError::NoDownloadedData(base.to_path_buf())),
    };
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().and_then(|s| s.parse::<Quarter>().ok()))
        .max()
        .ok_or_else(|| CliError::NoDownloadedData(base.to_path_buf()))
}

/// Resolve the folder holding the release to import.
pub fn import_directory(base: &Path, requested: Option<&str>) -> Result<(Quarter, PathBuf), CliError> {
    let quarter = match validate_quarter(requested)? {
        Some(quarter) => quarter,
        None => latest_downloaded(base)?,
    };
    let path = base.join(quarter.to_string());
    if !path.is_dir() {
        return Err(CliError::MissingDownloadDir(path));
    }
    Ok((quarter, path))
}

/// Selected tables in registry order; all of them if `names` is empty.
pub fn select_tables<'a>(
    registry: &'a TableRegistry,
    names: &[String],
) -> Result<Vec<&'a TableConfig>, CliError> {
    if let Some(name) = names.iter().find(|n| registry.get(n).is_none()) {
        return Err(CliError::UnknownTable {
            name: name.clone(),
            options: registry.names().join(", "),
        });
    }
    Ok(registry
        .all()
        .iter()
        .filter(|t| names.is_empty() || names.contains(&t.name))
        .collect())
}

pub fn summary_table(summaries: &[LoadSummary]) -> tabled::Table {
    let mut builder = Builder::new();
    builder.push_record(vec!["Table", "Rows", "Archives", "Files", "Skipped", "Warnings"]);
    for s in summaries {
        builder.push_record(vec![
            s.table.clone(),
            s.rows_imported.to_string(),
            s.archives.to_string(),
            s.files_loaded.to_string(),
            s.entries_skipped.to_string(),
            s.warnings.len().to_string(),
        ]);
    }
    let mut table = builder.build();
    table.with(Style::empty());
    table
}

pub fn download(
    quarter: Option<&str>,
    base_download_path: &Path,
    kind: DownloaderKind,
    url: &str,
) -> Result<(), CliError> {
    validate_quarter(quarter)?;
    let releases = pgfn::quarters(&LinkList::fetch(url)?);
    let (quarter, release_url) = select_release(&releases, quarter)?;

    let download_path = base_download_path.join(quarter.to_string());
    fs::create_dir_all(&download_path).map_err(|source| CliError::Io {
        path: download_path.clone(),
        source,
    })?;
    info!("Downloading quarter {} into {:?}", quarter, download_path);

    let mut downloader = kind.build();
    for (_, link) in LinkList::fetch(release_url.as_str())?.links() {
        if let Some(filename) = pgfn::download_filename(&link) {
            downloader.add(Download {
                url: link.to_string(),
                filename,
            });
        }
    }
    downloader.run(&download_path)?;
    Ok(())
}

pub fn import(
    quarter: Option<&str>,
    base_download_path: &Path,
    database_url: &str,
    options: &LoadOptions,
    tables: &[String],
) -> Result<Vec<LoadSummary>, CliError> {
    let (quarter, path) = import_directory(base_download_path, quarter)?;
    let registry = TableRegistry::divida_ativa()?;
    let selected = select_tables(&registry, tables)?;
    let mut destination = destination::connect(database_url)?;

    let mut summaries = Vec::new();
    for table in selected {
        info!("Importing quarter {} into table {}", quarter, table.name);
        let mut progress = progress_for_terminal();
        summaries.push(table.load(&path, destination.as_mut(), options, progress.as_mut())?);
    }
    Ok(summaries)
}

pub fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Download {
            quarter,
            base_download_path,
            downloader,
            url,
        } => download(quarter.as_deref(), &base_download_path, downloader, &url),
        Commands::Import {
            quarter,
            base_download_path,
            database_url,
            unlogged,
            access_method,
            no_drop,
            tables,
        } => {
            let options = LoadOptions {
                drop_existing: !no_drop,
                unlogged,
                storage_method: Some(access_method),
            };
            let summaries = import(
                quarter.as_deref(),
                &base_download_path,
                &database_url,
                &options,
                &tables,
            )?;
            println!("{}", summary_table(&summaries));
            Ok(())
        }
    }
}
