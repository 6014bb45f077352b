//! Generation-based local store.
//!
//! Every sync produces a new, immutable *generation*: a JSON mirror of all
//! records plus a SQLite database with a full-text index. Generations live in
//! `history/` and are never modified after publishing. Two stable aliases
//! point at the current one:
//!
//! ```text
//! <data dir>/
//!   defects.json  -> history/defects-20260130-225300.json
//!   defects.db    -> history/defects-20260130-225300.db
//!   sync_meta.json
//!   history/
//!     defects-20260129-081500.json
//!     defects-20260129-081500.db
//!     defects-20260130-225300.json
//!     defects-20260130-225300.db
//! ```
//!
//! Publishing is a two-phase commit. [`stage`] writes both artifacts under
//! `.tmp` names. [`StagedGeneration::commit`] renames them into place, swaps
//! the aliases and rewrites `sync_meta.json`. A crash before the alias swap
//! leaves the previous generation current and intact; leftover `.tmp` files
//! are removed by the next [`stage`].
//!
//! There is no inter-process locking: two syncs racing on the same data
//! directory can interleave cleanup and alias swaps.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::db;
use crate::models::{Defect, SyncMeta};
use crate::schema;

const HISTORY_DIR: &str = "history";
const ARTIFACT_PREFIX: &str = "defects-";
const TMP_SUFFIX: &str = ".tmp";

/// Paths of the on-disk layout rooted at a data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn history_dir(&self) -> PathBuf {
        self.root.join(HISTORY_DIR)
    }

    pub fn json_alias(&self) -> PathBuf {
        self.root.join("defects.json")
    }

    pub fn db_alias(&self) -> PathBuf {
        self.root.join("defects.db")
    }

    pub fn meta_path(&self) -> PathBuf {
        self.root.join("sync_meta.json")
    }

    fn artifact(&self, generation_id: &str, ext: &str) -> PathBuf {
        self.history_dir()
            .join(format!("{}{}.{}", ARTIFACT_PREFIX, generation_id, ext))
    }
}

/// A published generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub data_dir: PathBuf,
    pub generation_id: String,
    /// Base name relative to the data dir, without extension.
    pub history_base: String,
    pub count: usize,
}

impl Generation {
    pub fn json_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.json", self.history_base))
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.db", self.history_base))
    }
}

/// Both artifacts of a generation, fully written under temporary names but
/// not yet visible to readers.
#[derive(Debug)]
pub struct StagedGeneration {
    data: DataDir,
    generation_id: String,
    count: usize,
    json_tmp: PathBuf,
    db_tmp: PathBuf,
}

/// Generation id for a point in time: `YYYYMMDD-HHMMSS` (UTC), which sorts
/// lexicographically in time order.
pub fn generation_id(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d-%H%M%S").to_string()
}

/// Publish `defects` as the new current generation.
pub async fn publish(data: &DataDir, defects: &[Defect]) -> Result<Generation> {
    stage(data, defects, Utc::now()).await?.commit().await
}

/// Phase one: clean stale temp files and write both artifacts to temp names.
pub async fn stage(data: &DataDir, defects: &[Defect], now: DateTime<Utc>) -> Result<StagedGeneration> {
    let history = data.history_dir();
    fs::create_dir_all(&history)
        .await
        .with_context(|| format!("creating history directory {}", history.display()))?;

    remove_stale_temps(&history).await?;

    let generation_id = unique_generation_id(data, now).await?;
    let json_tmp = tmp_path(&data.artifact(&generation_id, "json"));
    let db_tmp = tmp_path(&data.artifact(&generation_id, "db"));

    write_json(&json_tmp, defects).await?;
    build_database(&db_tmp, defects).await?;

    debug!(generation = %generation_id, count = defects.len(), "staged generation");

    Ok(StagedGeneration {
        data: data.clone(),
        generation_id,
        count: defects.len(),
        json_tmp,
        db_tmp,
    })
}

impl StagedGeneration {
    pub fn generation_id(&self) -> &str {
        &self.generation_id
    }

    /// Phase two: rename artifacts into place, then repoint the aliases, then
    /// rewrite the sync metadata.
    pub async fn commit(self) -> Result<Generation> {
        let json_final = self.data.artifact(&self.generation_id, "json");
        let db_final = self.data.artifact(&self.generation_id, "db");

        fs::rename(&self.json_tmp, &json_final)
            .await
            .with_context(|| format!("renaming {}", self.json_tmp.display()))?;
        fs::rename(&self.db_tmp, &db_final)
            .await
            .with_context(|| format!("renaming {}", self.db_tmp.display()))?;

        let history_base = format!("{}/{}{}", HISTORY_DIR, ARTIFACT_PREFIX, self.generation_id);
        swap_alias(&self.data.json_alias(), Path::new(&format!("{}.json", history_base))).await?;
        swap_alias(&self.data.db_alias(), Path::new(&format!("{}.db", history_base))).await?;

        let meta = SyncMeta {
            last_sync: Utc::now().to_rfc3339(),
            defect_count: self.count,
            current: history_base.clone(),
        };
        write_sync_meta(&self.data, &meta).await?;

        info!(generation = %self.generation_id, count = self.count, "published generation");

        Ok(Generation {
            data_dir: self.data.root().to_path_buf(),
            generation_id: self.generation_id,
            history_base,
            count: self.count,
        })
    }
}

/// Read `sync_meta.json`, or `None` before the first sync.
pub async fn read_sync_meta(data: &DataDir) -> Result<Option<SyncMeta>> {
    let path = data.meta_path();
    let bytes = match fs::read(&path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    let meta = serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(meta))
}

/// Ids of all published generations, oldest first.
pub async fn list_generations(data: &DataDir) -> Result<Vec<String>> {
    let history = data.history_dir();
    let mut entries = match fs::read_dir(&history).await {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("listing {}", history.display())),
    };

    let mut ids = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(id) = name
            .strip_prefix(ARTIFACT_PREFIX)
            .and_then(|rest| rest.strip_suffix(".db"))
        {
            ids.push(id.to_string());
        }
    }
    ids.sort();
    Ok(ids)
}

/// Generation id the `defects.db` alias currently resolves to.
pub async fn current_generation(data: &DataDir) -> Result<Option<String>> {
    let target = match fs::read_link(data.db_alias()).await {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).context("reading defects.db alias"),
    };
    Ok(target
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix(ARTIFACT_PREFIX))
        .and_then(|n| n.strip_suffix(".db"))
        .map(str::to_string))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(TMP_SUFFIX);
    PathBuf::from(name)
}

/// Remove leftovers of interrupted builds, including SQLite journals of
/// half-written temp databases.
async fn remove_stale_temps(history: &Path) -> Result<()> {
    let mut entries = fs::read_dir(history)
        .await
        .with_context(|| format!("listing {}", history.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if name.to_string_lossy().contains(TMP_SUFFIX) {
            let path = entry.path();
            warn!(path = %path.display(), "removing stale temp file from interrupted sync");
            fs::remove_file(&path)
                .await
                .with_context(|| format!("removing {}", path.display()))?;
        }
    }
    Ok(())
}

/// Generation id for `now`, suffixed with `-2`, `-3`, ... if a generation
/// with the plain id was already published within the same second.
async fn unique_generation_id(data: &DataDir, now: DateTime<Utc>) -> Result<String> {
    let base = generation_id(now);
    let mut candidate = base.clone();
    let mut n = 1;
    while fs::try_exists(data.artifact(&candidate, "json")).await?
        || fs::try_exists(data.artifact(&candidate, "db")).await?
    {
        n += 1;
        candidate = format!("{}-{}", base, n);
    }
    Ok(candidate)
}

async fn write_json(path: &Path, defects: &[Defect]) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(defects).context("serializing defects")?;
    bytes.push(b'\n');

    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    file.write_all(&bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}

async fn build_database(path: &Path, defects: &[Defect]) -> Result<()> {
    let pool = db::create_database(path).await?;
    let result = async {
        schema::create_schema(&pool).await?;
        insert_defects(&pool, defects).await?;
        schema::rebuild_fts(&pool).await?;
        Ok::<_, anyhow::Error>(())
    }
    .await;
    pool.close().await;
    result.with_context(|| format!("building {}", path.display()))
}

async fn insert_defects(pool: &sqlx::SqlitePool, defects: &[Defect]) -> Result<()> {
    let mut tx = pool.begin().await?;

    for d in defects {
        sqlx::query(
            r#"
            INSERT INTO defects (
                id, name, status, priority, severity, owner, detected_by,
                description, description_html, dev_comments, dev_comments_html,
                created, modified, closed, reproducible, attachment,
                detected_in_rel, detected_in_rcyc, actual_fix_time,
                defect_type, application, workstream, module, target_date
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(d.id)
        .bind(&d.name)
        .bind(&d.status)
        .bind(&d.priority)
        .bind(&d.severity)
        .bind(&d.owner)
        .bind(&d.detected_by)
        .bind(&d.description)
        .bind(&d.description_html)
        .bind(&d.dev_comments)
        .bind(&d.dev_comments_html)
        .bind(&d.created)
        .bind(&d.modified)
        .bind(&d.closed)
        .bind(&d.reproducible)
        .bind(&d.attachment)
        .bind(&d.detected_in_rel)
        .bind(&d.detected_in_rcyc)
        .bind(d.actual_fix_time)
        .bind(&d.defect_type)
        .bind(&d.application)
        .bind(&d.workstream)
        .bind(&d.module)
        .bind(&d.target_date)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("inserting defect {}", d.id))?;
    }

    tx.commit().await?;
    Ok(())
}

/// Point `alias` at `target` (relative to the alias's directory).
///
/// On Unix the new link is created beside the alias and renamed over it, so
/// the alias always resolves to either the old or the new target.
#[cfg(unix)]
async fn swap_alias(alias: &Path, target: &Path) -> Result<()> {
    let staging = tmp_path(alias);
    if fs::symlink_metadata(&staging).await.is_ok() {
        fs::remove_file(&staging).await?;
    }
    fs::symlink(target, &staging)
        .await
        .with_context(|| format!("creating link {}", staging.display()))?;
    fs::rename(&staging, alias)
        .await
        .with_context(|| format!("replacing alias {}", alias.display()))?;
    Ok(())
}

#[cfg(windows)]
async fn swap_alias(alias: &Path, target: &Path) -> Result<()> {
    if fs::symlink_metadata(alias).await.is_ok() {
        fs::remove_file(alias).await?;
    }
    fs::symlink_file(target, alias)
        .await
        .with_context(|| format!("creating alias {}", alias.display()))?;
    Ok(())
}

async fn write_sync_meta(data: &DataDir, meta: &SyncMeta) -> Result<()> {
    let path = data.meta_path();
    let tmp = tmp_path(&path);
    let mut body = serde_json::to_string_pretty(meta)?;
    body.push('\n');
    fs::write(&tmp, body)
        .await
        .with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, &path)
        .await
        .with_context(|| format!("renaming {}", tmp.display()))?;
    Ok(())
}
