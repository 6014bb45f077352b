//! Ad-hoc read-only SQL over the current generation.
//!
//! Statements must start with `SELECT`, `WITH` or `EXPLAIN`. That check is a
//! courtesy for the user; the actual guarantee is the read-only connection,
//! which also rejects writes smuggled in after a `SELECT` prefix.

use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Executor, Row, Statement, TypeInfo, ValueRef};
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;

use crate::db;
use crate::store::DataDir;

const READ_ONLY_KEYWORDS: &[&str] = &["SELECT", "WITH", "EXPLAIN"];
const MAX_CELL_WIDTH: usize = 60;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Only SELECT, WITH, and EXPLAIN queries are allowed")]
    PolicyViolation,
    #[error("Database not found: {}. Run `alm sync` first.", .0.display())]
    NotFound(PathBuf),
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

/// Whether `sql` begins with a read-only statement keyword.
pub fn is_read_only(sql: &str) -> bool {
    let upper = sql.trim_start().to_uppercase();
    READ_ONLY_KEYWORDS.iter().any(|kw| upper.starts_with(kw))
}

/// Column names plus rows of JSON scalars (`null`, number, or string).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Run `sql` against the current generation.
pub async fn execute_query(data: &DataDir, sql: &str) -> Result<QueryResult, QueryError> {
    if !is_read_only(sql) {
        return Err(QueryError::PolicyViolation);
    }

    let path = data.db_alias();
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Err(QueryError::NotFound(path));
    }

    let pool = db::open_read_only(&path).await?;
    let result = run(&pool, sql).await;
    pool.close().await;
    result
}

async fn run(pool: &sqlx::SqlitePool, sql: &str) -> Result<QueryResult, QueryError> {
    let rows = sqlx::query(sql).fetch_all(pool).await?;

    let columns: Vec<String> = match rows.first() {
        Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
        None => pool
            .prepare(sql)
            .await?
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect(),
    };

    let rows = rows
        .iter()
        .map(|row| (0..row.len()).map(|i| cell(row, i)).collect())
        .collect::<Result<Vec<Vec<Value>>, sqlx::Error>>()?;

    Ok(QueryResult { columns, rows })
}

fn cell(row: &SqliteRow, i: usize) -> Result<Value, sqlx::Error> {
    let raw = row.try_get_raw(i)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_string();
    Ok(match type_name.as_str() {
        "INTEGER" => Value::from(row.try_get::<i64, _>(i)?),
        "REAL" => Value::from(row.try_get::<f64, _>(i)?),
        "BLOB" => {
            let bytes: Vec<u8> = row.try_get(i)?;
            Value::String(format!("<blob {} bytes>", bytes.len()))
        }
        _ => Value::String(row.try_get::<String, _>(i)?),
    })
}

fn display(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate(s: String) -> String {
    if s.chars().count() > MAX_CELL_WIDTH {
        let head: String = s.chars().take(MAX_CELL_WIDTH - 3).collect();
        format!("{}...", head)
    } else {
        s
    }
}

fn csv_field(value: &Value) -> String {
    let s = match value {
        Value::Null => String::new(),
        other => display(other),
    };
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s
    }
}

fn json_keys(columns: &[String]) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::new();
    columns
        .iter()
        .map(|name| {
            let mut key = name.clone();
            let mut n = 2;
            while used.contains(&key) {
                key = format!("{}_{}", name, n);
                n += 1;
            }
            used.insert(key.clone());
            key
        })
        .collect()
}

impl QueryResult {
    /// Aligned text table; long values are cut to 60 characters.
    pub fn to_table(&self) -> String {
        if self.rows.is_empty() {
            return "(no results)".to_string();
        }

        let cells: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| row.iter().map(|v| truncate(display(v))).collect())
            .collect();

        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.chars().count()).collect();
        for row in &cells {
            for (i, val) in row.iter().enumerate() {
                if let Some(w) = widths.get_mut(i) {
                    *w = (*w).max(val.chars().count());
                }
            }
        }

        let pad = |s: &str, w: usize| format!("{}{}", s, " ".repeat(w.saturating_sub(s.chars().count())));

        let mut lines = Vec::with_capacity(cells.len() + 2);
        lines.push(
            self.columns
                .iter()
                .zip(&widths)
                .map(|(c, w)| pad(c, *w))
                .collect::<Vec<_>>()
                .join("  "),
        );
        lines.push(
            widths
                .iter()
                .map(|w| "-".repeat(*w))
                .collect::<Vec<_>>()
                .join("  "),
        );
        for row in &cells {
            lines.push(
                row.iter()
                    .zip(&widths)
                    .map(|(v, w)| pad(v, *w))
                    .collect::<Vec<_>>()
                    .join("  "),
            );
        }
        lines.join("\n")
    }

    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        let header: Vec<String> = self
            .columns
            .iter()
            .map(|c| csv_field(&Value::String(c.clone())))
            .collect();
        out.push_str(&header.join(","));
        out.push('\n');
        for row in &self.rows {
            out.push_str(&row.iter().map(csv_field).collect::<Vec<_>>().join(","));
            out.push('\n');
        }
        out
    }

    /// Array of objects keyed by column name, in column order. A repeated
    /// column name gets a `_2`, `_3`, ... suffix so no column is lost.
    pub fn to_json(&self) -> String {
        let keys = json_keys(&self.columns);
        let objects: Vec<Value> = self
            .rows
            .iter()
            .map(|row| {
                let map: serde_json::Map<String, Value> = keys
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect();
                Value::Object(map)
            })
            .collect();
        serde_json::to_string_pretty(&objects).unwrap_or_else(|_| "[]".to_string())
    }
}
