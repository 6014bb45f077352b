use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;

use crate::models::Defect;
use crate::store::DataDir;

/// Open a short-lived read-only pool on the current generation.
///
/// Resolves through the `defects.db` alias. Returns `None` when no
/// generation has been published yet (or the alias dangles).
pub async fn connect_current(data: &DataDir) -> Result<Option<SqlitePool>> {
    let db_path = data.db_alias();
    if !tokio::fs::try_exists(&db_path).await.unwrap_or(false) {
        return Ok(None);
    }

    let pool = open_read_only(&db_path)
        .await
        .with_context(|| format!("opening {}", db_path.display()))?;

    Ok(Some(pool))
}

/// Single-connection pool that SQLite itself refuses to write through.
pub async fn open_read_only(path: &Path) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .read_only(true);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
}

/// Create a brand-new database file for a generation build.
///
/// Uses the rollback journal rather than WAL so that a finished build is a
/// single self-contained file that can be renamed into place.
pub async fn create_database(path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .with_context(|| format!("creating {}", path.display()))?;

    Ok(pool)
}

pub(crate) fn row_to_defect(row: &SqliteRow) -> Result<Defect> {
    Ok(Defect {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        status: row.try_get("status")?,
        priority: row.try_get("priority")?,
        severity: row.try_get("severity")?,
        owner: row.try_get("owner")?,
        detected_by: row.try_get("detected_by")?,
        description: row.try_get("description")?,
        description_html: row.try_get("description_html")?,
        dev_comments: row.try_get("dev_comments")?,
        dev_comments_html: row.try_get("dev_comments_html")?,
        created: row.try_get("created")?,
        modified: row.try_get("modified")?,
        closed: row.try_get("closed")?,
        reproducible: row.try_get("reproducible")?,
        attachment: row.try_get("attachment")?,
        detected_in_rel: row.try_get("detected_in_rel")?,
        detected_in_rcyc: row.try_get("detected_in_rcyc")?,
        actual_fix_time: row.try_get("actual_fix_time")?,
        defect_type: row.try_get("defect_type")?,
        application: row.try_get("application")?,
        workstream: row.try_get("workstream")?,
        module: row.try_get("module")?,
        target_date: row.try_get("target_date")?,
    })
}
