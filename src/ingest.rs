//! Sync orchestration.
//!
//! Coordinates the full flow: fetch every page from ALM, normalize the raw
//! entities, then publish them as a new generation. Nothing is written
//! until the fetch and normalization have both succeeded, so a failed sync
//! leaves the current generation untouched.

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;

use crate::alm_client::{self, AlmClient, AlmError, PageSource};
use crate::config::Config;
use crate::models::DefectPage;
use crate::normalize;
use crate::progress::{SyncProgressEvent, SyncProgressReporter};
use crate::store::{self, DataDir, Generation};

/// Command-line overrides for the `[alm]` tuning values.
#[derive(Debug, Clone, Default)]
pub struct SyncOverrides {
    pub page_size: Option<usize>,
    pub delay_secs: Option<f64>,
}

/// Outcome of a sync, printed by the CLI.
#[derive(Debug, Clone)]
pub struct SyncSummary {
    pub fetched: usize,
    pub total: usize,
    pub generation: Generation,
}

impl SyncSummary {
    pub fn print(&self) {
        println!("sync alm");
        println!("  fetched: {} of {} defects", self.fetched, self.total);
        println!("  published: {} defects", self.generation.count);
        println!("  generation: {}", self.generation.generation_id);
        println!("ok");
    }
}

/// Fetch from ALM and publish a new generation into `data`.
pub async fn run_sync(
    config: &Config,
    data: &DataDir,
    overrides: &SyncOverrides,
    reporter: &dyn SyncProgressReporter,
) -> Result<SyncSummary> {
    let alm = config.require_alm()?;
    let client = AlmClient::new(alm)
        .map_err(with_remediation)
        .context("building ALM HTTP client")?;

    let page_size = overrides.page_size.unwrap_or(alm.page_size);
    let delay = overrides.delay_secs.unwrap_or(alm.delay_secs);
    if page_size == 0 {
        anyhow::bail!("page size must be > 0");
    }
    if !(delay >= 0.0 && delay.is_finite()) {
        anyhow::bail!("delay must be >= 0 seconds");
    }

    sync_from(&client, data, page_size, Duration::from_secs_f64(delay), reporter).await
}

/// The sync pipeline over any page source.
pub async fn sync_from(
    source: &dyn PageSource,
    data: &DataDir,
    page_size: usize,
    delay: Duration,
    reporter: &dyn SyncProgressReporter,
) -> Result<SyncSummary> {
    let fetched = alm_client::fetch_all(source, page_size, delay, reporter)
        .await
        .map_err(with_remediation)?;

    reporter.report(SyncProgressEvent::Normalizing {
        count: fetched.entities.len(),
    });
    let defects = normalize::normalize(&fetched.entities)?;

    reporter.report(SyncProgressEvent::Publishing {
        count: defects.len(),
    });
    let generation = store::publish(data, &defects).await?;

    Ok(SyncSummary {
        fetched: fetched.entities.len(),
        total: fetched.total,
        generation,
    })
}

/// Publish a saved API response (`{"entities": [...], "TotalResults": n}`).
pub async fn run_sync_file(
    data: &DataDir,
    path: &Path,
    reporter: &dyn SyncProgressReporter,
) -> Result<SyncSummary> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let page: DefectPage = serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing {} as an ALM defects response", path.display()))?;

    reporter.report(SyncProgressEvent::Normalizing {
        count: page.entities.len(),
    });
    let defects = normalize::normalize_page(&page)?;

    reporter.report(SyncProgressEvent::Publishing {
        count: defects.len(),
    });
    let generation = store::publish(data, &defects).await?;

    Ok(SyncSummary {
        fetched: page.entities.len(),
        total: page.total_results.unwrap_or(page.entities.len()),
        generation,
    })
}

fn with_remediation(err: AlmError) -> anyhow::Error {
    match err.remediation() {
        Some(hint) => anyhow::Error::new(err).context(hint),
        None => anyhow::Error::new(err),
    }
}
