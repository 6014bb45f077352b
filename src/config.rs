use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::store::DataDir;

/// Environment variable that overrides the data directory.
pub const DATA_DIR_ENV: &str = "ALM_DATA_DIR";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alm: Option<AlmConfig>,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AlmConfig {
    /// Base URL including the `/qcbin` context root.
    pub base_url: String,
    pub domain: String,
    pub project: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_delay_secs")]
    pub delay_secs: f64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Session cookies copied from an authenticated browser session.
    pub cookies: BTreeMap<String, String>,
}

fn default_page_size() -> usize {
    1000
}
fn default_delay_secs() -> f64 {
    1.5
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct DataConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8765".to_string()
}

impl AlmConfig {
    /// `Cookie` header value, `name=value` pairs joined with `; `.
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn defects_url(&self) -> String {
        format!(
            "{}/rest/domains/{}/projects/{}/defects",
            self.base_url.trim_end_matches('/'),
            self.domain,
            self.project
        )
    }
}

impl Config {
    /// Configuration used when no config file exists yet.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// The `[alm]` section, or an error telling the user how to create one.
    pub fn require_alm(&self) -> Result<&AlmConfig> {
        self.alm.as_ref().context(
            "no [alm] section configured. Run `alm config import-curl` with a curl command \
             copied from the browser's DevTools",
        )
    }

    /// Resolve the data directory: `ALM_DATA_DIR`, then `[data].dir`, then the
    /// platform data directory.
    pub fn data_dir(&self) -> DataDir {
        if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
            return DataDir::new(PathBuf::from(dir));
        }
        if let Some(ref dir) = self.data.dir {
            return DataDir::new(dir.clone());
        }
        let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        DataDir::new(base.join("alm-harness"))
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Like [`load_config`], but a missing file yields [`Config::minimal`].
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(Config::minimal())
    }
}

pub fn save_config(path: &Path, config: &Config) -> Result<()> {
    validate(config)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(config).context("Failed to serialize config")?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;
    Ok(())
}

fn validate(config: &Config) -> Result<()> {
    if let Some(ref alm) = config.alm {
        if alm.base_url.trim().is_empty() {
            anyhow::bail!("alm.base_url must not be empty");
        }
        if alm.domain.trim().is_empty() || alm.project.trim().is_empty() {
            anyhow::bail!("alm.domain and alm.project must not be empty");
        }
        if alm.cookies.is_empty() {
            anyhow::bail!("alm.cookies must contain at least one cookie");
        }
        if alm.page_size == 0 {
            anyhow::bail!("alm.page_size must be > 0");
        }
        if !(alm.delay_secs >= 0.0 && alm.delay_secs.is_finite()) {
            anyhow::bail!("alm.delay_secs must be >= 0");
        }
        if alm.timeout_secs == 0 {
            anyhow::bail!("alm.timeout_secs must be > 0");
        }
    }

    if config.server.bind.trim().is_empty() {
        anyhow::bail!("server.bind must not be empty");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const FULL: &str = r#"
[alm]
base_url = "https://alm.example.com/qcbin/"
domain = "DEFAULT"
project = "Rollout"
page_size = 250

[alm.cookies]
LWSSO_COOKIE_KEY = "abc=="
QCSession = "xyz"

[data]
dir = "/tmp/alm-data"

[server]
bind = "0.0.0.0:9000"
"#;

    fn write(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("alm.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn example_config_is_valid() {
        let config: Config = toml::from_str(include_str!("../config/alm.example.toml")).unwrap();
        validate(&config).unwrap();
        let alm = config.require_alm().unwrap();
        assert_eq!(alm.defects_url(), "https://alm.example.com/qcbin/rest/domains/DEFAULT/projects/Rollout/defects");
        assert!(config.data.dir.is_none());
    }

    #[test]
    fn parses_full_config_with_defaults() {
        let tmp = TempDir::new().unwrap();
        let cfg = load_config(&write(&tmp, FULL)).unwrap();
        let alm = cfg.require_alm().unwrap();
        assert_eq!(alm.page_size, 250);
        assert_eq!(alm.delay_secs, 1.5);
        assert_eq!(alm.timeout_secs, 60);
        assert_eq!(alm.cookie_header(), "LWSSO_COOKIE_KEY=abc==; QCSession=xyz");
        assert_eq!(
            alm.defects_url(),
            "https://alm.example.com/qcbin/rest/domains/DEFAULT/projects/Rollout/defects"
        );
        assert_eq!(cfg.server.bind, "0.0.0.0:9000");
        assert_eq!(cfg.data.dir, Some(PathBuf::from("/tmp/alm-data")));
    }

    #[test]
    fn empty_file_is_minimal() {
        let tmp = TempDir::new().unwrap();
        let cfg = load_config(&write(&tmp, "")).unwrap();
        assert!(cfg.alm.is_none());
        assert!(cfg.require_alm().is_err());
        assert_eq!(cfg.server.bind, "127.0.0.1:8765");
    }

    #[test]
    fn missing_file_falls_back() {
        let tmp = TempDir::new().unwrap();
        let cfg = load_config_or_default(&tmp.path().join("nope.toml")).unwrap();
        assert!(cfg.alm.is_none());
        assert!(load_config(&tmp.path().join("nope.toml")).is_err());
    }

    #[test]
    fn rejects_zero_page_size() {
        let tmp = TempDir::new().unwrap();
        let body = FULL.replace("page_size = 250", "page_size = 0");
        let err = load_config(&write(&tmp, &body)).unwrap_err();
        assert!(err.to_string().contains("page_size"));
    }

    #[test]
    fn rejects_empty_cookies() {
        let tmp = TempDir::new().unwrap();
        let body = r#"
[alm]
base_url = "https://alm.example.com/qcbin"
domain = "D"
project = "P"
cookies = {}
"#;
        let err = load_config(&write(&tmp, body)).unwrap_err();
        assert!(err.to_string().contains("cookies"));
    }

    #[test]
    fn save_then_load_round_trips() {
        let tmp = TempDir::new().unwrap();
        let cfg = load_config(&write(&tmp, FULL)).unwrap();
        let out = tmp.path().join("nested").join("saved.toml");
        save_config(&out, &cfg).unwrap();
        let again = load_config(&out).unwrap();
        let (a, b) = (cfg.require_alm().unwrap(), again.require_alm().unwrap());
        assert_eq!(a.base_url, b.base_url);
        assert_eq!(a.cookies, b.cookies);
        assert_eq!(a.page_size, b.page_size);
        assert_eq!(again.server.bind, cfg.server.bind);
    }
}
