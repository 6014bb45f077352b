//! Aggregate statistics over the current generation.
//!
//! Counts are always over the whole table. Breakdowns cover only open
//! defects unless `include_closed` is set. "Open" here means a status of
//! exactly `open`, case-insensitive; statuses like `New` or `Reopen` count
//! on the not-open side.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::collections::HashMap;

use crate::db;
use crate::filter::priority_rank;
use crate::store::DataDir;

/// Label used for records with no value in a breakdown column.
pub const NONE_LABEL: &str = "(none)";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub name: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OldestDefect {
    pub id: i64,
    pub name: String,
    pub created: String,
}

/// Days from `created` to `closed`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CloseTimeStats {
    pub p50: f64,
    pub p75: f64,
    pub avg: f64,
}

impl CloseTimeStats {
    /// Each value rounded to one decimal, for display.
    pub fn rounded(self) -> Self {
        let r = |v: f64| (v * 10.0).round() / 10.0;
        Self {
            p50: r(self.p50),
            p75: r(self.p75),
            avg: r(self.avg),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub total: i64,
    pub open_count: i64,
    pub closed_count: i64,
    pub by_priority: Vec<Bucket>,
    pub by_module: Vec<Bucket>,
    pub by_owner: Vec<Bucket>,
    pub by_type: Vec<Bucket>,
    pub by_workstream: Vec<Bucket>,
    pub oldest_open: Option<OldestDefect>,
    pub close_time: Option<CloseTimeStats>,
}

/// Count values in first-seen order, then order by descending count. The
/// sort is stable, so equal counts keep first-seen order. `top` caps the
/// result when set.
pub fn breakdown<'a>(values: impl IntoIterator<Item = Option<&'a str>>, top: Option<usize>) -> Vec<Bucket> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut buckets: Vec<Bucket> = Vec::new();
    for value in values {
        let key = value.unwrap_or(NONE_LABEL);
        match index.get(key) {
            Some(&i) => buckets[i].count += 1,
            None => {
                index.insert(key, buckets.len());
                buckets.push(Bucket {
                    name: key.to_string(),
                    count: 1,
                });
            }
        }
    }
    buckets.sort_by(|a, b| b.count.cmp(&a.count));
    if let Some(top) = top {
        buckets.truncate(top);
    }
    buckets
}

/// Median, 75th percentile and mean of close durations in days.
///
/// Negative durations (closed before created) are ignored. Percentiles pick
/// an element of the sorted list: p50 at `n/2`, p75 at `min(floor(0.75n), n-1)`.
pub fn close_time_stats(days: &[f64]) -> Option<CloseTimeStats> {
    let mut sorted: Vec<f64> = days.iter().copied().filter(|d| *d >= 0.0).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);

    let n = sorted.len();
    let p75_idx = ((n as f64 * 0.75) as usize).min(n - 1);
    Some(CloseTimeStats {
        p50: sorted[n / 2],
        p75: sorted[p75_idx],
        avg: sorted.iter().sum::<f64>() / n as f64,
    })
}

fn is_open(status: Option<&str>) -> bool {
    status.is_some_and(|s| s.eq_ignore_ascii_case("open"))
}

struct StatRow {
    status: Option<String>,
    priority: Option<String>,
    module: Option<String>,
    owner: Option<String>,
    defect_type: Option<String>,
    workstream: Option<String>,
}

/// Compute statistics, or `None` before the first sync. `top_n` caps the
/// module, owner, type and workstream breakdowns; 0 leaves them uncapped.
pub async fn get_stats(data: &DataDir, include_closed: bool, top_n: usize) -> Result<Option<Stats>> {
    let Some(pool) = db::connect_current(data).await? else {
        return Ok(None);
    };
    let result = compute(&pool, include_closed, top_n).await;
    pool.close().await;
    result.map(Some)
}

async fn compute(pool: &sqlx::SqlitePool, include_closed: bool, top_n: usize) -> Result<Stats> {
    let rows = sqlx::query(
        "SELECT status, priority, module, owner, defect_type, workstream FROM defects ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    let mut all = Vec::with_capacity(rows.len());
    for row in &rows {
        all.push(StatRow {
            status: row.try_get("status")?,
            priority: row.try_get("priority")?,
            module: row.try_get("module")?,
            owner: row.try_get("owner")?,
            defect_type: row.try_get("defect_type")?,
            workstream: row.try_get("workstream")?,
        });
    }

    let total = all.len() as i64;
    let open_count = all.iter().filter(|r| is_open(r.status.as_deref())).count() as i64;

    let scope: Vec<&StatRow> = all
        .iter()
        .filter(|r| include_closed || is_open(r.status.as_deref()))
        .collect();

    let mut by_priority = breakdown(scope.iter().map(|r| r.priority.as_deref()), None);
    by_priority.sort_by(|a, b| {
        priority_rank(Some(a.name.as_str()))
            .cmp(&priority_rank(Some(b.name.as_str())))
            .then_with(|| a.name.cmp(&b.name))
    });

    let top = (top_n > 0).then_some(top_n);
    let by_module = breakdown(scope.iter().map(|r| r.module.as_deref()), top);
    let by_owner = breakdown(scope.iter().map(|r| r.owner.as_deref()), top);
    let by_type = breakdown(scope.iter().map(|r| r.defect_type.as_deref()), top);
    let by_workstream = breakdown(scope.iter().map(|r| r.workstream.as_deref()), top);

    let oldest_open = sqlx::query(
        r#"
        SELECT id, name, created FROM defects
        WHERE LOWER(status) = 'open' AND created IS NOT NULL
        ORDER BY created ASC, id ASC
        LIMIT 1
        "#,
    )
    .fetch_optional(pool)
    .await?
    .map(|row| -> Result<OldestDefect> {
        Ok(OldestDefect {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            created: row.try_get("created")?,
        })
    })
    .transpose()?;

    let days: Vec<Option<f64>> = sqlx::query_scalar(
        r#"
        SELECT julianday(closed) - julianday(created)
        FROM defects
        WHERE closed IS NOT NULL AND created IS NOT NULL
        "#,
    )
    .fetch_all(pool)
    .await?;
    let days: Vec<f64> = days.into_iter().flatten().collect();

    Ok(Stats {
        total,
        open_count,
        closed_count: total - open_count,
        by_priority,
        by_module,
        by_owner,
        by_type,
        by_workstream,
        oldest_open,
        close_time: close_time_stats(&days),
    })
}

/// Human duration: hours under a day, then days, weeks and months.
pub fn format_days(days: f64) -> String {
    if days < 1.0 {
        format!("{}h", (days * 24.0) as i64)
    } else if days < 7.0 {
        format!("{:.0}d", days)
    } else if days < 30.0 {
        format!("{:.1}w", days / 7.0)
    } else {
        format!("{:.1}mo", days / 30.0)
    }
}

/// Text report for `alm stats`.
pub fn format_stats(stats: &Stats, include_closed: bool, top_n: usize) -> String {
    let mut out: Vec<String> = Vec::new();
    out.push(format!(
        "Defects: {} open / {} closed ({} total)",
        stats.open_count, stats.closed_count, stats.total
    ));
    if let Some(ref oldest) = stats.oldest_open {
        let mut name = oldest.name.clone();
        if name.chars().count() > 45 {
            name = format!("{}...", name.chars().take(42).collect::<String>());
        }
        out.push(format!("Oldest open: #{} ({}) - {}", oldest.id, oldest.created, name));
    }
    if let Some(ct) = stats.close_time {
        out.push(format!(
            "Close time:  p50: {} | p75: {} | avg: {}",
            format_days(ct.p50),
            format_days(ct.p75),
            format_days(ct.avg)
        ));
    }

    let base = if include_closed { stats.total } else { stats.open_count };
    let scope = if include_closed { "all" } else { "open" };
    let sections: [(&str, &[Bucket], bool); 5] = [
        ("Priority", &stats.by_priority, false),
        ("Module", &stats.by_module, true),
        ("Owner", &stats.by_owner, true),
        ("Type", &stats.by_type, true),
        ("Workstream", &stats.by_workstream, true),
    ];
    for (title, buckets, capped) in sections {
        if buckets.is_empty() {
            continue;
        }
        let top = if capped && top_n > 0 && buckets.len() >= top_n {
            format!(", top {}", buckets.len())
        } else {
            String::new()
        };
        out.push(String::new());
        out.push(format!("By {} ({}{}):", title, scope, top));

        let label_width = buckets.iter().map(|b| b.name.chars().count()).max().unwrap_or(0);
        let count_width = buckets
            .iter()
            .map(|b| b.count.to_string().len())
            .max()
            .unwrap_or(1);
        for b in buckets {
            let pct = if base > 0 {
                b.count as f64 / base as f64 * 100.0
            } else {
                0.0
            };
            out.push(format!(
                "  {:<lw$}  {:>cw$}  ({:.0}%)",
                b.name,
                b.count,
                pct,
                lw = label_width,
                cw = count_width
            ));
        }
    }
    out.join("\n")
}
