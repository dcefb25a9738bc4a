use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use clap::ValueEnum;
use log::{info, warn};
use reqwest::{
    blocking::Client,
    header::{UPGRADE_INSECURE_REQUESTS, USER_AGENT},
    StatusCode,
};
use thiserror::Error;

const INPUT_FILENAME: &str = ".aria2c-input.txt";

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("I/O error in {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("Failed running aria2c: {0}")]
    Spawn(io::Error),
    #[error("aria2c exited with {0}")]
    Aria2c(std::process::ExitStatus),
    #[error("Download of {url} failed: {source}")]
    Http { url: String, source: reqwest::Error },
    #[error("Download of {url} failed with status {status}")]
    Status { url: String, status: StatusCode },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub url: String,
    pub filename: String,
}

pub trait Downloader {
    fn add(&mut self, download: Download);
    /// Download everything registered so far into `directory`.
    fn run(&mut self, directory: &Path) -> Result<(), DownloadError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum DownloaderKind {
    #[default]
    Aria2c,
    Http,
}

impl DownloaderKind {
    pub fn build(&self) -> Box<dyn Downloader> {
        match self {
            DownloaderKind::Aria2c => Box::new(Aria2cDownloader::default()),
            DownloaderKind::Http => Box::new(HttpDownloader::default()),
        }
    }
}

/// Hands the downloads to the `aria2c` download accelerator.
#[derive(Debug, Default)]
pub struct Aria2cDownloader {
    downloads: Vec<Download>,
}

impl Aria2cDownloader {
    /// Content of an aria2c input file (`-i`), one url per entry followed by
    /// its indented options.
    pub fn input_file(&self) -> String {
        self.downloads
            .iter()
            .map(|d| format!("{}\n  out={}\n", d.url, d.filename))
            .collect()
    }
}

impl Downloader for Aria2cDownloader {
    fn add(&mut self, download: Download) {
        self.downloads.push(download);
    }

    fn run(&mut self, directory: &Path) -> Result<(), DownloadError> {
        if self.downloads.is_empty() {
            return Ok(());
        }
        let input_path = directory.join(INPUT_FILENAME);
        fs::write(&input_path, self.input_file()).map_err(|source| DownloadError::Io {
            path: input_path.clone(),
            source,
        })?;

        info!("Downloading {} file(s) with aria2c", self.downloads.len());
        let status = Command::new("aria2c")
            .arg("--continue=true")
            .arg("--auto-file-renaming=false")
            .arg("--max-connection-per-server=4")
            .arg("--split=4")
            .arg("-d")
            .arg(directory)
            .arg("-i")
            .arg(&input_path)
            .status();
        if let Err(e) = fs::remove_file(&input_path) {
            warn!("Could not remove {:?}: {}", input_path, e);
        }
        let status = status.map_err(DownloadError::Spawn)?;
        if !status.success() {
            return Err(DownloadError::Aria2c(status));
        }
        self.downloads.clear();
        Ok(())
    }
}

/// Sequential in-process downloads, for machines without aria2c.
#[derive(Debug, Default)]
pub struct HttpDownloader {
    downloads: Vec<Download>,
}

impl HttpDownloader {
    fn download_file(client: &Client, url: &str, file_path: &Path) -> Result<u64, DownloadError> {
        let http_error = |source| DownloadError::Http {
            url: url.to_string(),
            source,
        };
        let mut response = client
            .get(url)
            .header(USER_AGENT, "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36")
            .header(UPGRADE_INSECURE_REQUESTS, "1")
            .send()
            .map_err(http_error)?;
        if response.status() != StatusCode::OK {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }
        let io_error = |source| DownloadError::Io {
            path: file_path.to_path_buf(),
            source,
        };
        let mut out = File::create(file_path).map_err(io_error)?;
        let n = response.copy_to(&mut out).map_err(http_error)?;
        out.flush().map_err(io_error)?;
        Ok(n)
    }
}

impl Downloader for HttpDownloader {
    fn add(&mut self, download: Download) {
        self.downloads.push(download);
    }

    fn run(&mut self, directory: &Path) -> Result<(), DownloadError> {
        let client = Client::builder()
            .timeout(None::<Duration>)
            .build()
            .map_err(|source| DownloadError::Http {
                url: String::new(),
                source,
            })?;
        for download in &self.downloads {
            let path = directory.join(&download.filename);
            info!("Downloading {} to {:?}", download.url, path);
            let n = HttpDownloader::download_file(&client, &download.url, &path)?;
            info!("downloaded {} bytes", n);
        }
        self.downloads.clear();
        Ok(())
    }
}
