//! Read-only JSON API backing the defects dashboard.
//!
//! Every handler reads the current generation through the data directory's
//! aliases, so a sync that publishes while the server runs is picked up on
//! the next request without a restart.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/api/defects` | Filtered, paginated list or full-text search |
//! | `GET`  | `/api/defects/{id}` | One defect |
//! | `GET`  | `/api/stats` | Aggregate statistics |
//! | `POST` | `/api/query` | Ad-hoc read-only SQL |
//! | `GET`  | `/api/sync` | Contents of `sync_meta.json` |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "limit must be between 1 and 5000" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a dashboard dev
//! server on another port can call the API.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::filter::{self, DefectFilter};
use crate::models::{Defect, SyncMeta};
use crate::search;
use crate::sql::{self, QueryError, QueryResult};
use crate::stats::{self, Stats};
use crate::store::{self, DataDir};

/// Most hits a search request considers before filtering and paging.
const SEARCH_CAP: usize = 500;
const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 5000;
const DEFAULT_TOP: usize = 10;

#[derive(Clone)]
struct AppState {
    data: Arc<DataDir>,
}

/// Build the API router over `data`.
pub fn router(data: DataDir) -> Router {
    let state = AppState {
        data: Arc::new(data),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/defects", get(handle_list))
        .route("/api/defects/{id}", get(handle_get))
        .route("/api/stats", get(handle_stats))
        .route("/api/query", post(handle_query))
        .route("/api/sync", get(handle_sync_meta))
        .layer(cors)
        .with_state(state)
}

/// Serve the API on `[server].bind` until the process is terminated.
pub async fn run_server(config: &Config, data: DataDir) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = router(data);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "dashboard API listening");
    println!("Dashboard API listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        error!(error = %format!("{:#}", err), "request failed");
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal".to_string(),
            message: format!("{:#}", err),
        }
    }
}

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::NotFound(_) => not_found(err.to_string()),
            QueryError::PolicyViolation | QueryError::Sql(_) => bad_request(err.to_string()),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /api/defects ============

#[derive(Debug, Default, Deserialize)]
struct ListParams {
    status: Option<String>,
    priority: Option<String>,
    owner: Option<String>,
    module: Option<String>,
    defect_type: Option<String>,
    workstream: Option<String>,
    q: Option<String>,
    page: Option<usize>,
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ListResponse {
    defects: Vec<Defect>,
    total: usize,
    page: usize,
    pages: usize,
}

fn split_values(raw: &Option<String>) -> Vec<String> {
    raw.as_deref()
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// Query parameters to a filter. In `status`, `!terminal` keeps only active
/// defects and `!<status>` excludes that status.
fn filter_from_params(params: &ListParams) -> DefectFilter {
    let mut filter = DefectFilter {
        priority: split_values(&params.priority),
        owner: split_values(&params.owner),
        module: split_values(&params.module),
        defect_type: split_values(&params.defect_type),
        workstream: split_values(&params.workstream),
        ..DefectFilter::default()
    };
    for status in split_values(&params.status) {
        match status.strip_prefix('!') {
            Some(rest) if rest.eq_ignore_ascii_case("terminal") => filter.active_only = true,
            Some(rest) => filter.exclude_status.push(rest.to_string()),
            None => filter.status.push(status),
        }
    }
    filter
}

async fn handle_list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse>, AppError> {
    let page = params.page.unwrap_or(1);
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    if page < 1 {
        return Err(bad_request("page must be >= 1"));
    }
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(bad_request(format!("limit must be between 1 and {}", MAX_LIMIT)));
    }
    // The offset is spliced into SQL, where it must fit an i64.
    let offset = (page - 1)
        .checked_mul(limit)
        .filter(|o| *o <= i64::MAX as usize)
        .ok_or_else(|| bad_request("page out of range"))?;
    let filter = filter_from_params(&params);

    let (defects, total) = match params.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        Some(q) => {
            let hits = search::search_filtered(&state.data, q, &filter, SEARCH_CAP).await?;
            let total = hits.len();
            let page_hits = hits.into_iter().skip(offset).take(limit).collect();
            (page_hits, total)
        }
        None => {
            let total = filter::count_defects(&state.data, &filter).await? as usize;
            let defects = filter::list_defects(&state.data, &filter, Some(limit), offset).await?;
            (defects, total)
        }
    };

    let pages = if total > 0 { total.div_ceil(limit) } else { 1 };
    Ok(Json(ListResponse {
        defects,
        total,
        page,
        pages,
    }))
}

// ============ GET /api/defects/{id} ============

async fn handle_get(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Defect>, AppError> {
    match filter::get_defect(&state.data, id).await? {
        Some(defect) => Ok(Json(defect)),
        None => Err(not_found(format!("defect {} not found", id))),
    }
}

// ============ GET /api/stats ============

#[derive(Debug, Default, Deserialize)]
struct StatsParams {
    #[serde(default)]
    include_closed: bool,
    top: Option<usize>,
}

async fn handle_stats(
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Stats>, AppError> {
    let top = params.top.unwrap_or(DEFAULT_TOP);
    let mut stats = stats::get_stats(&state.data, params.include_closed, top)
        .await?
        .unwrap_or_default();
    stats.close_time = stats.close_time.map(|ct| ct.rounded());
    Ok(Json(stats))
}

// ============ POST /api/query ============

#[derive(Debug, Deserialize)]
struct QueryRequest {
    sql: String,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResult>, AppError> {
    Ok(Json(sql::execute_query(&state.data, &req.sql).await?))
}

// ============ GET /api/sync ============

async fn handle_sync_meta(State(state): State<AppState>) -> Result<Json<Option<SyncMeta>>, AppError> {
    Ok(Json(store::read_sync_meta(&state.data).await?))
}
