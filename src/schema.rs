use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::db;
use crate::store::DataDir;

/// Columns of the `defects` table with their SQL type and a short description.
pub const DEFECT_COLUMNS: &[(&str, &str, &str)] = &[
    ("id", "INTEGER", "Defect ID (e.g., 993)"),
    ("name", "TEXT", "Defect title/summary"),
    ("status", "TEXT", "Open, Closed, Rejected, etc."),
    ("priority", "TEXT", "P1-Critical, P2-High, P3-Medium, P4-Low"),
    ("severity", "TEXT", "Severity level"),
    ("owner", "TEXT", "Assigned owner (username or email)"),
    ("detected_by", "TEXT", "Who reported it"),
    ("description", "TEXT", "Plain text description (HTML stripped)"),
    ("description_html", "TEXT", "Original HTML description"),
    ("dev_comments", "TEXT", "Plain text dev comments (HTML stripped)"),
    ("dev_comments_html", "TEXT", "Original HTML dev comments"),
    ("created", "TEXT", "Creation date (YYYY-MM-DD)"),
    ("modified", "TEXT", "Last modified (YYYY-MM-DD HH:MM:SS)"),
    ("closed", "TEXT", "Close date (YYYY-MM-DD) or NULL if open"),
    ("reproducible", "TEXT", "Is defect reproducible"),
    ("attachment", "TEXT", "Attachment info"),
    ("detected_in_rel", "TEXT", "Detected in release"),
    ("detected_in_rcyc", "TEXT", "Detected in release cycle"),
    ("actual_fix_time", "INTEGER", "Actual fix time"),
    ("defect_type", "TEXT", "Type (01_Code, 02_Configuration, 03_Data Error, etc.)"),
    ("application", "TEXT", "Application name"),
    ("workstream", "TEXT", "Workstream name"),
    ("module", "TEXT", "Module name (Data, Configuration, Functional, Integration)"),
    ("target_date", "TEXT", "Target fix date"),
];

/// Create the full schema in a fresh database: the `defects` table, the
/// `defects_fts` index, and secondary indexes used by list filters.
///
/// Only ever called on a brand-new file; every generation is built from
/// scratch, so there is no migration path.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    let columns = DEFECT_COLUMNS
        .iter()
        .map(|(name, ty, _)| match *name {
            "id" => "id INTEGER PRIMARY KEY".to_string(),
            "name" => "name TEXT NOT NULL".to_string(),
            _ => format!("{} {}", name, ty),
        })
        .collect::<Vec<_>>()
        .join(",\n            ");

    let ddl = format!("CREATE TABLE defects (\n            {}\n        )", columns);
    sqlx::query(&ddl).execute(pool).await?;

    // External-content FTS5 table; rows are filled by a 'rebuild' after the
    // bulk insert, so rowid always equals defects.id.
    sqlx::query(
        r#"
        CREATE VIRTUAL TABLE defects_fts USING fts5(
            name,
            description,
            owner,
            detected_by,
            content='defects',
            content_rowid='id'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX idx_defects_status ON defects(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX idx_defects_owner ON defects(owner)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX idx_defects_priority ON defects(priority)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Populate `defects_fts` from the `defects` table.
pub async fn rebuild_fts(pool: &SqlitePool) -> Result<()> {
    sqlx::query("INSERT INTO defects_fts(defects_fts) VALUES('rebuild')")
        .execute(pool)
        .await?;
    Ok(())
}

const SCHEMA_EXAMPLES: &str = r#"
Table: defects_fts (full-text search)
  FTS5 index over name, description, owner, detected_by.
  Join with defects: JOIN defects d ON d.id = defects_fts.rowid

EXAMPLES:

  # Open P1 defects
  alm query "SELECT id, name, owner FROM defects
             WHERE status = 'Open' AND priority = 'P1-Critical'"

  # Defects closed in the last 7 days
  alm query "SELECT id, name, closed FROM defects
             WHERE closed >= date('now', '-7 days') ORDER BY closed DESC"

  # Full-text search for 'invoice'
  alm query "SELECT d.id, d.name, d.status FROM defects d
             JOIN defects_fts f ON d.id = f.rowid
             WHERE defects_fts MATCH 'invoice'"

  # Average close time by workstream
  alm query "SELECT workstream,
                    ROUND(AVG(julianday(closed) - julianday(created)), 1) AS avg_days
             FROM defects WHERE closed IS NOT NULL
             GROUP BY workstream ORDER BY avg_days"
"#;

/// Human-readable schema documentation for `alm schema`.
///
/// Reads the live column list from the current generation when one exists,
/// otherwise documents the static column set.
pub async fn schema_help(data: &DataDir) -> Result<String> {
    let mut live: Vec<(String, String)> = Vec::new();
    if let Some(pool) = db::connect_current(data).await? {
        let rows = sqlx::query("PRAGMA table_info(defects)")
            .fetch_all(&pool)
            .await;
        pool.close().await;
        for row in rows? {
            let name: String = row.try_get("name")?;
            let ty: String = row.try_get("type")?;
            live.push((name, ty));
        }
    }

    if live.is_empty() {
        live = DEFECT_COLUMNS
            .iter()
            .map(|(n, t, _)| (n.to_string(), t.to_string()))
            .collect();
    }

    let mut out = String::from("SCHEMA:\n\nTable: defects\n");
    for (name, ty) in &live {
        let ty = if ty.is_empty() { "TEXT" } else { ty.as_str() };
        match DEFECT_COLUMNS.iter().find(|(n, _, _)| *n == name.as_str()) {
            Some((_, _, doc)) => out.push_str(&format!("  {:<20} {:<10} -- {}\n", name, ty, doc)),
            None => out.push_str(&format!("  {:<20} {}\n", name, ty)),
        }
    }
    out.push_str(SCHEMA_EXAMPLES);
    Ok(out)
}
