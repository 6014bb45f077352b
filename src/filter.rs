//! Point lookup, filtered listing and counting over the current generation.
//!
//! Every call opens its own read-only connection through the `defects.db`
//! alias and closes it before returning. Before the first sync there is no
//! alias, and every operation here returns an empty result instead of an
//! error.
//!
//! # Filter semantics
//!
//! | Dimension | Match |
//! |-----------|-------|
//! | `status`, `priority` | case-insensitive exact |
//! | `owner`, `module`, `defect_type`, `workstream` | case-insensitive substring |
//! | `exclude_status` | case-insensitive exact, removed from the result |
//! | `active_only` | drops terminal and null statuses |
//!
//! Values within one dimension are OR'd; dimensions are AND'd.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::db;
use crate::models::Defect;
use crate::store::DataDir;

/// Statuses meaning no more work will happen on a defect.
pub const TERMINAL_STATUSES: &[&str] = &["closed", "rejected", "duplicate", "deferred"];

/// Sort rank of the known priorities. Anything else ranks [`UNRANKED`].
pub const PRIORITY_ORDER: &[(&str, u32)] = &[
    ("P1-Critical", 1),
    ("P2-High", 2),
    ("P3-Medium", 3),
    ("P4-Low", 4),
];

pub const UNRANKED: u32 = 999;

pub fn priority_rank(priority: Option<&str>) -> u32 {
    priority
        .and_then(|p| PRIORITY_ORDER.iter().find(|(name, _)| *name == p))
        .map(|(_, rank)| *rank)
        .unwrap_or(UNRANKED)
}

/// `CASE` expression ranking `column` like [`priority_rank`].
pub(crate) fn priority_sort_sql(column: &str) -> String {
    let whens: String = PRIORITY_ORDER
        .iter()
        .map(|(name, rank)| format!(" WHEN '{}' THEN {}", name, rank))
        .collect();
    format!("CASE {}{} ELSE {} END", column, whens, UNRANKED)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefectFilter {
    #[serde(default)]
    pub status: Vec<String>,
    #[serde(default)]
    pub priority: Vec<String>,
    #[serde(default)]
    pub owner: Vec<String>,
    #[serde(default)]
    pub module: Vec<String>,
    #[serde(default)]
    pub defect_type: Vec<String>,
    #[serde(default)]
    pub workstream: Vec<String>,
    #[serde(default)]
    pub exclude_status: Vec<String>,
    #[serde(default)]
    pub active_only: bool,
}

impl DefectFilter {
    pub fn is_empty(&self) -> bool {
        self == &DefectFilter::default()
    }

    /// SQL condition and its bind parameters. `prefix` qualifies column names
    /// (e.g. `"d."`) when the defects table is joined.
    pub(crate) fn where_clause(&self, prefix: &str) -> (String, Vec<String>) {
        let mut conditions: Vec<String> = Vec::new();
        let mut params: Vec<String> = Vec::new();

        exact(&mut conditions, &mut params, prefix, "status", &self.status);
        exact(&mut conditions, &mut params, prefix, "priority", &self.priority);
        substring(&mut conditions, &mut params, prefix, "owner", &self.owner);
        substring(&mut conditions, &mut params, prefix, "module", &self.module);
        substring(&mut conditions, &mut params, prefix, "defect_type", &self.defect_type);
        substring(&mut conditions, &mut params, prefix, "workstream", &self.workstream);

        let excluded = non_empty(&self.exclude_status);
        if !excluded.is_empty() {
            conditions.push(format!(
                "({p}status IS NULL OR LOWER({p}status) NOT IN ({}))",
                placeholders(excluded.len()),
                p = prefix
            ));
            params.extend(excluded.iter().map(|v| v.to_lowercase()));
        }

        if self.active_only {
            conditions.push(format!(
                "{p}status IS NOT NULL AND LOWER({p}status) NOT IN ({})",
                placeholders(TERMINAL_STATUSES.len()),
                p = prefix
            ));
            params.extend(TERMINAL_STATUSES.iter().map(|s| s.to_string()));
        }

        if conditions.is_empty() {
            ("1=1".to_string(), params)
        } else {
            (conditions.join(" AND "), params)
        }
    }
}

fn non_empty(values: &[String]) -> Vec<&str> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .collect()
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

fn exact(conditions: &mut Vec<String>, params: &mut Vec<String>, prefix: &str, column: &str, values: &[String]) {
    let values = non_empty(values);
    if values.is_empty() {
        return;
    }
    conditions.push(format!(
        "LOWER({}{}) IN ({})",
        prefix,
        column,
        placeholders(values.len())
    ));
    params.extend(values.iter().map(|v| v.to_lowercase()));
}

// instr() rather than LIKE so `%` and `_` in user input match literally.
fn substring(conditions: &mut Vec<String>, params: &mut Vec<String>, prefix: &str, column: &str, values: &[String]) {
    let values = non_empty(values);
    if values.is_empty() {
        return;
    }
    let ors = values
        .iter()
        .map(|_| format!("instr(LOWER({}{}), ?) > 0", prefix, column))
        .collect::<Vec<_>>()
        .join(" OR ");
    conditions.push(format!("({})", ors));
    params.extend(values.iter().map(|v| v.to_lowercase()));
}

/// Fetch one defect by id.
pub async fn get_defect(data: &DataDir, id: i64) -> Result<Option<Defect>> {
    let Some(pool) = db::connect_current(data).await? else {
        return Ok(None);
    };

    let row = sqlx::query("SELECT * FROM defects WHERE id = ?")
        .bind(id)
        .fetch_optional(&pool)
        .await;
    pool.close().await;

    match row? {
        Some(row) => Ok(Some(db::row_to_defect(&row)?)),
        None => Ok(None),
    }
}

/// Defects matching `filter`, by priority rank, then creation date, then id.
pub async fn list_defects(
    data: &DataDir,
    filter: &DefectFilter,
    limit: Option<usize>,
    offset: usize,
) -> Result<Vec<Defect>> {
    let Some(pool) = db::connect_current(data).await? else {
        return Ok(Vec::new());
    };

    let (where_sql, params) = filter.where_clause("");
    let mut sql = format!(
        "SELECT * FROM defects WHERE {} ORDER BY {}, created ASC, id ASC",
        where_sql,
        priority_sort_sql("priority")
    );
    match (limit, offset) {
        (Some(limit), offset) => sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset)),
        (None, 0) => {}
        (None, offset) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
    }

    let mut query = sqlx::query(&sql);
    for p in &params {
        query = query.bind(p);
    }
    let rows = query.fetch_all(&pool).await;
    pool.close().await;

    rows?.iter().map(db::row_to_defect).collect()
}

/// Number of defects matching `filter`.
pub async fn count_defects(data: &DataDir, filter: &DefectFilter) -> Result<i64> {
    let Some(pool) = db::connect_current(data).await? else {
        return Ok(0);
    };

    let (where_sql, params) = filter.where_clause("");
    let sql = format!("SELECT COUNT(*) FROM defects WHERE {}", where_sql);
    let mut query = sqlx::query_scalar::<_, i64>(&sql);
    for p in &params {
        query = query.bind(p);
    }
    let count = query.fetch_one(&pool).await;
    pool.close().await;

    Ok(count?)
}
