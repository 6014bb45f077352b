//! REST client for the ALM defects collection and the paginated fetch loop.
//!
//! Pages are requested strictly one after another, ordered by `id asc`, with
//! a politeness delay in between. Nothing is retried: the first failed page
//! fails the whole fetch.
//!
//! Redirects are never followed. An expired ALM session answers with a 302 to
//! the login page (or a bare 401/403), and all of those surface as
//! [`AlmError::AuthExpired`] so the caller can tell the user to refresh their
//! cookies instead of reporting an opaque HTML decode failure.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, COOKIE};
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::AlmConfig;
use crate::models::{DefectPage, RawEntity};
use crate::progress::{SyncProgressEvent, SyncProgressReporter};

#[derive(Debug, Error)]
pub enum AlmError {
    #[error("ALM session expired or unauthorized (HTTP {status})")]
    AuthExpired { status: u16 },
    #[error("ALM returned HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("cookie `{0}` contains characters that cannot be sent in an HTTP header")]
    InvalidCookie(String),
    #[error("request to ALM failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("could not decode ALM response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl AlmError {
    /// What the user should do next, when there is something they can do.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            AlmError::AuthExpired { .. } => Some(
                "Log in to ALM in your browser, copy any defects request from DevTools \
                 as cURL, then run `alm config import-curl` to refresh the cookies.",
            ),
            AlmError::InvalidCookie(_) => Some(
                "Fix the value under [alm.cookies] in the config file; it must be a single \
                 line without control characters.",
            ),
            _ => None,
        }
    }
}

/// One page of the remote defects collection.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch `page_size` entities starting at the 1-based `start_index`.
    async fn fetch_page(&self, page_size: usize, start_index: usize) -> Result<DefectPage, AlmError>;
}

/// All entities from a completed fetch.
#[derive(Debug, Clone)]
pub struct FetchedDefects {
    pub entities: Vec<RawEntity>,
    pub total: usize,
}

pub struct AlmClient {
    client: reqwest::Client,
    url: String,
}

impl AlmClient {
    pub fn new(config: &AlmConfig) -> Result<Self, AlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            "alm-client-type",
            HeaderValue::from_static("ALM Web Client UI"),
        );
        let cookie = HeaderValue::from_str(&config.cookie_header()).map_err(|_| {
            let name = config
                .cookies
                .iter()
                .find(|(name, value)| HeaderValue::from_str(&format!("{}={}", name, value)).is_err())
                .map(|(name, _)| name.clone())
                .unwrap_or_default();
            AlmError::InvalidCookie(name)
        })?;
        headers.insert(COOKIE, cookie);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            url: config.defects_url(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PageSource for AlmClient {
    async fn fetch_page(&self, page_size: usize, start_index: usize) -> Result<DefectPage, AlmError> {
        debug!(url = %self.url, page_size, start_index, "requesting defects page");

        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("page-size", page_size.to_string()),
                ("start-index", start_index.to_string()),
                ("order-by", "{id[asc];}".to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status.is_redirection()
            || status == StatusCode::UNAUTHORIZED
            || status == StatusCode::FORBIDDEN
        {
            return Err(AlmError::AuthExpired {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(AlmError::HttpStatus {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Fetch every page from `source`.
///
/// The first response's `TotalResults` fixes the expected total (falling back
/// to that page's entity count). The loop stops on a short page or once the
/// accumulated count reaches the total.
pub async fn fetch_all(
    source: &dyn PageSource,
    page_size: usize,
    delay: Duration,
    reporter: &dyn SyncProgressReporter,
) -> Result<FetchedDefects, AlmError> {
    let page_size = page_size.max(1);
    let mut entities: Vec<RawEntity> = Vec::new();
    let mut total: Option<usize> = None;
    let mut start_index = 1;
    let mut page = 0;

    loop {
        page += 1;
        let batch = source.fetch_page(page_size, start_index).await?;
        let returned = batch.entities.len();
        entities.extend(batch.entities);

        let expected = *total.get_or_insert(batch.total_results.unwrap_or(returned));
        reporter.report(SyncProgressEvent::Fetching {
            page,
            total_pages: expected.div_ceil(page_size),
            fetched: entities.len(),
        });

        if returned < page_size || entities.len() >= expected {
            break;
        }

        tokio::time::sleep(delay).await;
        start_index += page_size;
    }

    let total = total.unwrap_or(entities.len()).max(entities.len());
    Ok(FetchedDefects { entities, total })
}
