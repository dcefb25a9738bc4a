use std::collections::BTreeMap;
use std::time::Duration;

use log::{debug, info, warn};
use scraper::{Html, Selector};
use thiserror::Error;
use url::Url;

use crate::quarter::Quarter;

/// Root of the PGFN open data listing, one sub-directory per quarter.
pub const LISTING_URL: &str = "http://dadosabertos.pgfn.gov.br/";

const PARENT_DIRECTORY: &str = "Parent Directory";
const LINK_SELECTOR: &str = "li > a";

#[derive(Error, Debug)]
pub enum ListingError {
    #[error("Invalid url {url:?}: {source}")]
    Url {
        url: String,
        source: url::ParseError,
    },
    #[error("Failed fetching {url}: {source}")]
    Http { url: String, source: reqwest::Error },
    #[error("Failed fetching {url}: status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("Invalid selector {selector:?}: {message}")]
    Selector { selector: String, message: String },
}

/// The links of a directory listing page (`<li><a href=...>label</a></li>`).
#[derive(Debug, Clone)]
pub struct LinkList {
    url: Url,
    html: String,
    selector: Selector,
}

impl LinkList {
    /// Fetch the listing page.  Parsing is deferred to [`LinkList::links`].
    pub fn fetch(url: &str) -> Result<LinkList, ListingError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|source| ListingError::Http {
                url: url.to_string(),
                source,
            })?;
        let http_error = |source| ListingError::Http {
            url: url.to_string(),
            source,
        };
        info!("Fetching listing {}", url);
        let response = client.get(url).send().map_err(http_error)?;
        if !response.status().is_success() {
            return Err(ListingError::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }
        let html = response.text().map_err(http_error)?;
        LinkList::parse(url, html)
    }

    pub fn parse(url: &str, html: String) -> Result<LinkList, ListingError> {
        let url = Url::parse(url).map_err(|source| ListingError::Url {
            url: url.to_string(),
            source,
        })?;
        let selector = Selector::parse(LINK_SELECTOR).map_err(|e| ListingError::Selector {
            selector: LINK_SELECTOR.to_string(),
            message: e.to_string(),
        })?;
        Ok(LinkList {
            url,
            html,
            selector,
        })
    }

    /// `(label, absolute url)` pairs in document order, without the parent
    /// directory entry.  Each call starts over from the top of the page.
    pub fn links(&self) -> impl Iterator<Item = (String, Url)> + '_ {
        let document = Html::parse_document(&self.html);
        let links: Vec<(String, Url)> = document
            .select(&self.selector)
            .filter_map(|a| {
                let href = a.value().attr("href")?;
                let label = a.text().next().map(str::trim).unwrap_or_default();
                if label == PARENT_DIRECTORY {
                    return None;
                }
                match self.url.join(href) {
                    Ok(url) => Some((label.to_string(), url)),
                    Err(e) => {
                        warn!("Skipping link {:?} on {}: {}", href, self.url, e);
                        None
                    }
                }
            })
            .collect();
        links.into_iter()
    }
}

/// Releases on the listing page, keyed by quarter.  Labels look like
/// `2023_trimestre_04/`.
pub fn quarters(listing: &LinkList) -> BTreeMap<Quarter, Url> {
    listing
        .links()
        .filter(|(label, _)| label.contains("trimestre"))
        .filter_map(|(label, url)| match Quarter::from_listing_label(&label) {
            Ok(quarter) => Some((quarter, url)),
            Err(e) => {
                debug!("Ignoring release {:?}: {}", label, e);
                None
            }
        })
        .collect()
}

/// File name to save a release file as: the last segment of its url path.
pub fn download_filename(url: &Url) -> Option<String> {
    url.path_segments()?
        .next_back()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}
