use anyhow::Result;

use crate::db;
use crate::filter::DefectFilter;
use crate::models::Defect;
use crate::store::DataDir;

/// Build an FTS5 MATCH expression treating every word as a quoted prefix
/// term, e.g. `rob invoice` becomes `"rob"* "invoice"*` (implicit AND).
///
/// Double quotes are dropped from the input so user text cannot break out of
/// a term. Returns `None` when no words remain.
pub fn fts_query(query: &str) -> Option<String> {
    let cleaned = query.replace('"', "");
    let terms: Vec<String> = cleaned
        .split_whitespace()
        .map(|word| format!("\"{}\"*", word))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

/// Full-text search over name, description, owner and detected_by, best
/// matches first.
pub async fn search_defects(data: &DataDir, query: &str, limit: usize) -> Result<Vec<Defect>> {
    search_filtered(data, query, &DefectFilter::default(), limit).await
}

/// [`search_defects`] restricted to records that also match `filter`.
pub async fn search_filtered(
    data: &DataDir,
    query: &str,
    filter: &DefectFilter,
    limit: usize,
) -> Result<Vec<Defect>> {
    let Some(fts) = fts_query(query) else {
        return Ok(Vec::new());
    };
    let Some(pool) = db::connect_current(data).await? else {
        return Ok(Vec::new());
    };

    let (where_sql, params) = filter.where_clause("d.");
    let sql = format!(
        r#"
        SELECT d.* FROM defects d
        JOIN defects_fts ON d.id = defects_fts.rowid
        WHERE defects_fts MATCH ? AND {}
        ORDER BY defects_fts.rank
        LIMIT ?
        "#,
        where_sql
    );

    let mut q = sqlx::query(&sql).bind(&fts);
    for p in &params {
        q = q.bind(p);
    }
    let rows = q.bind(limit as i64).fetch_all(&pool).await;
    pool.close().await;

    rows?.iter().map(db::row_to_defect).collect()
}
