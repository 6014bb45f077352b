//! Bootstrap ALM connection settings from a "Copy as cURL" command.
//!
//! The browser's DevTools produce a command line with the request URL and a
//! `-b '<cookies>'` argument holding the authenticated session. Both are all
//! `alm sync` needs.

use std::collections::BTreeMap;
use thiserror::Error;
use url::Url;

use crate::config::AlmConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CurlError {
    #[error("failed to parse curl command: unbalanced quotes or bad escape")]
    Tokenize,
    #[error("command must start with 'curl'")]
    NotCurl,
    #[error("no URL found in curl command")]
    NoUrl,
    #[error("invalid URL {url}: {reason}")]
    BadUrl { url: String, reason: String },
    #[error("no cookies found in curl command (need -b or --cookie)")]
    NoCookies,
    #[error("could not extract domain/project from URL path {0}; expected /domains/<domain>/projects/<project>/...")]
    NoProject(String),
}

/// Connection settings extracted from a curl command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurlConfig {
    pub base_url: String,
    pub domain: String,
    pub project: String,
    pub cookies: BTreeMap<String, String>,
}

impl CurlConfig {
    /// An `[alm]` section with these settings and default tuning values.
    pub fn into_alm_config(self) -> AlmConfig {
        AlmConfig {
            base_url: self.base_url,
            domain: self.domain,
            project: self.project,
            page_size: 1000,
            delay_secs: 1.5,
            timeout_secs: 60,
            cookies: self.cookies,
        }
    }
}

// Flags whose next token is an argument, not the URL.
const FLAGS_WITH_ARG: &[&str] = &["-H", "--header", "-X", "--request", "--data-raw", "--data", "-d"];

pub fn parse_curl(command: &str) -> Result<CurlConfig, CurlError> {
    let joined = command.replace("\\\r\n", " ").replace("\\\n", " ").replace('\n', " ");
    let tokens = shlex::split(&joined).ok_or(CurlError::Tokenize)?;

    if tokens.first().map(String::as_str) != Some("curl") {
        return Err(CurlError::NotCurl);
    }

    let mut url: Option<&str> = None;
    let mut cookies = BTreeMap::new();
    let mut i = 1;
    while i < tokens.len() {
        let token = tokens[i].as_str();
        if matches!(token, "-b" | "--cookie") && i + 1 < tokens.len() {
            cookies = parse_cookies(&tokens[i + 1]);
            i += 2;
        } else if FLAGS_WITH_ARG.contains(&token) {
            i += 2;
        } else if token.starts_with('-') {
            i += 1;
        } else {
            if url.is_none() {
                url = Some(token);
            }
            i += 1;
        }
    }

    let url = url.ok_or(CurlError::NoUrl)?;
    if cookies.is_empty() {
        return Err(CurlError::NoCookies);
    }

    let parsed = Url::parse(url).map_err(|e| CurlError::BadUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    let host = parsed.host_str().ok_or_else(|| CurlError::BadUrl {
        url: url.to_string(),
        reason: "missing host".to_string(),
    })?;
    let netloc = match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    let base_url = format!("{}://{}/qcbin", parsed.scheme(), netloc);

    let (domain, project) =
        domain_and_project(&parsed).ok_or_else(|| CurlError::NoProject(parsed.path().to_string()))?;

    Ok(CurlConfig {
        base_url,
        domain,
        project,
        cookies,
    })
}

/// `name=value` pairs separated by `;`. Values may themselves contain `=`.
pub fn parse_cookies(header: &str) -> BTreeMap<String, String> {
    header
        .split(';')
        .filter_map(|part| part.trim().split_once('='))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect()
}

fn domain_and_project(url: &Url) -> Option<(String, String)> {
    let segments: Vec<&str> = url.path_segments()?.collect();
    segments.windows(4).find_map(|w| match w {
        ["domains", domain, "projects", project] if !domain.is_empty() && !project.is_empty() => {
            Some((domain.to_string(), project.to_string()))
        }
        _ => None,
    })
}
