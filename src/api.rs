// src/api.rs
//! Thin JSON adapter over the pipeline. Every read goes through
//! `get_or_refresh`, so routes only ever fail on a cold start.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::error::PipelineError;
use crate::lines::{self, CatalogLine, Operator, CATALOG};
use crate::model::{LineStatus, SnapshotSource, StatusCode as LineCode};
use crate::pipeline::{CycleReport, StatusPipeline, StatusSnapshot};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<StatusPipeline>,
    pub started: Instant,
}

impl AppState {
    pub fn new(pipeline: Arc<StatusPipeline>) -> Self {
        Self {
            pipeline,
            started: Instant::now(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status_all))
        .route("/api/status/{operator}", get(status_by_operator))
        .route("/api/status/code/{code}", get(status_by_code))
        .route("/api/problems", get(problems))
        .route("/api/stats", get(stats))
        .route("/api/lines", get(catalog))
        .route("/api/lines/{id}", get(line_by_id))
        .route("/api/code/{number}", get(line_by_number))
        .route("/api/line/name/{name}", get(line_by_name))
        .route("/api/refresh", post(refresh))
        .route("/debug", get(debug))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Error body: `{ "error": ..., "kind": ... }`.
pub struct ApiError {
    status: StatusCode,
    message: String,
    kind: &'static str,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
            kind: "not_found",
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            kind: "bad_request",
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: e.to_string(),
            kind: e.kind(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "error": self.message, "kind": self.kind })),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Serialize)]
struct HealthOut {
    status: &'static str,
    uptime_secs: u64,
    cache_age_secs: Option<u64>,
    has_cached_data: bool,
}

async fn health(State(state): State<AppState>) -> Json<HealthOut> {
    Json(HealthOut {
        status: "ok",
        uptime_secs: state.started.elapsed().as_secs(),
        cache_age_secs: state.pipeline.cache_age().map(|d| d.as_secs()),
        has_cached_data: state.pipeline.has_cached_data(),
    })
}

#[derive(Serialize)]
pub struct StatusOut {
    pub total_lines: usize,
    pub normal_lines: usize,
    pub problem_lines: usize,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    pub source: SnapshotSource,
    pub updated_at: DateTime<Utc>,
    pub lines: Vec<LineStatus>,
}

impl StatusOut {
    fn build(snap: &StatusSnapshot, lines: Vec<LineStatus>) -> Self {
        let problem_lines = lines.iter().filter(|l| l.is_problem()).count();
        Self {
            total_lines: lines.len(),
            normal_lines: lines.len() - problem_lines,
            problem_lines,
            cached: snap.cached,
            warning: snap.warning.clone(),
            source: snap.source,
            updated_at: snap.updated_at,
            lines,
        }
    }
}

async fn status_all(State(state): State<AppState>) -> ApiResult<StatusOut> {
    let snap = state.pipeline.get_or_refresh().await?;
    Ok(Json(StatusOut::build(&snap, snap.lines.to_vec())))
}

async fn status_by_operator(
    State(state): State<AppState>,
    Path(operator): Path<String>,
) -> ApiResult<StatusOut> {
    let op = Operator::parse(&operator)
        .ok_or_else(|| ApiError::bad_request(format!("unknown operator '{operator}', use metro or cptm")))?;
    let snap = state.pipeline.get_or_refresh().await?;
    let lines = snap
        .lines
        .iter()
        .filter(|l| l.operator.as_deref() == Some(op.as_str()))
        .cloned()
        .collect();
    Ok(Json(StatusOut::build(&snap, lines)))
}

async fn status_by_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<StatusOut> {
    let wanted = LineCode::parse(&code).ok_or_else(|| {
        ApiError::bad_request(format!(
            "unknown status code '{code}', use NORMAL, REDUCED, CLOSED, HALTED, UNKNOWN or 0-4"
        ))
    })?;
    let snap = state.pipeline.get_or_refresh().await?;
    let lines: Vec<LineStatus> = snap
        .lines
        .iter()
        .filter(|l| l.status_code == wanted)
        .cloned()
        .collect();
    if lines.is_empty() {
        let mut present: Vec<&str> = snap.lines.iter().map(|l| l.status_code.as_str()).collect();
        present.sort_unstable();
        present.dedup();
        return Err(ApiError::not_found(format!(
            "no line is {}; current statuses: {}",
            wanted.as_str(),
            present.join(", ")
        )));
    }
    Ok(Json(StatusOut::build(&snap, lines)))
}

async fn problems(State(state): State<AppState>) -> ApiResult<StatusOut> {
    let snap = state.pipeline.get_or_refresh().await?;
    let lines = snap.problems().cloned().collect();
    Ok(Json(StatusOut::build(&snap, lines)))
}

#[derive(Serialize)]
struct StatsOut {
    total_lines: usize,
    by_status: BTreeMap<&'static str, usize>,
    by_quality: BTreeMap<&'static str, usize>,
    cached: bool,
    source: SnapshotSource,
    updated_at: DateTime<Utc>,
}

async fn stats(State(state): State<AppState>) -> ApiResult<StatsOut> {
    let snap = state.pipeline.get_or_refresh().await?;
    let mut by_status: BTreeMap<&'static str, usize> = [
        LineCode::Normal,
        LineCode::Reduced,
        LineCode::Closed,
        LineCode::Halted,
        LineCode::Unknown,
    ]
    .iter()
    .map(|c| (c.as_str(), 0))
    .collect();
    let mut by_quality: BTreeMap<&'static str, usize> = BTreeMap::new();
    for l in snap.lines.iter() {
        *by_status.entry(l.status_code.as_str()).or_default() += 1;
        *by_quality.entry(l.data_quality.as_str()).or_default() += 1;
    }
    Ok(Json(StatsOut {
        total_lines: snap.lines.len(),
        by_status,
        by_quality,
        cached: snap.cached,
        source: snap.source,
        updated_at: snap.updated_at,
    }))
}

async fn catalog() -> Json<Vec<CatalogLine>> {
    Json(CATALOG.to_vec())
}

async fn line_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<LineStatus> {
    let snap = state.pipeline.get_or_refresh().await?;
    snap.lines
        .iter()
        .find(|l| l.id.eq_ignore_ascii_case(id.trim()))
        .cloned()
        .map(Json)
        .ok_or_else(|| match lines::by_id(&id) {
            Some(l) => ApiError::not_found(format!("{} not reported by the source", l.name)),
            None => ApiError::not_found(format!("unknown line '{id}'")),
        })
}

async fn line_by_number(
    State(state): State<AppState>,
    Path(number): Path<String>,
) -> ApiResult<LineStatus> {
    let wanted = number.trim().trim_start_matches('0');
    let snap = state.pipeline.get_or_refresh().await?;
    snap.lines
        .iter()
        .find(|l| l.number == wanted)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no status for line {number}")))
}

/// First line whose display name or color contains `name`, ignoring case
/// and accents.
async fn line_by_name(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<LineStatus> {
    let wanted = lines::fold_accents(name.trim()).to_lowercase();
    if wanted.is_empty() {
        return Err(ApiError::bad_request("empty line name"));
    }
    let matches = |s: &str| lines::fold_accents(s).to_lowercase().contains(&wanted);
    let snap = state.pipeline.get_or_refresh().await?;
    snap.lines
        .iter()
        .find(|l| matches(l.name.as_str()) || l.color.as_deref().is_some_and(matches))
        .cloned()
        .map(Json)
        .ok_or_else(|| {
            let names: Vec<&str> = snap.lines.iter().map(|l| l.name.as_str()).collect();
            ApiError::not_found(format!(
                "no line matching '{name}'; available: {}",
                names.join(", ")
            ))
        })
}

async fn refresh(State(state): State<AppState>) -> ApiResult<StatusOut> {
    let snap = state.pipeline.force_refresh().await?;
    Ok(Json(StatusOut::build(&snap, snap.lines.to_vec())))
}

#[derive(Serialize)]
struct DebugOut {
    #[serde(rename = "lastDebug")]
    report: Option<CycleReport>,
    cache_age_secs: Option<u64>,
    last_good_entries: usize,
    status_sources: Vec<String>,
    reason_source: Option<String>,
}

async fn debug(State(state): State<AppState>) -> Json<DebugOut> {
    let p = &state.pipeline;
    Json(DebugOut {
        report: p.last_report(),
        cache_age_secs: p.cache_age().map(|d| d.as_secs()),
        last_good_entries: p.last_good_len(),
        status_sources: p.config().status_urls.clone(),
        reason_source: p.config().reason_url.clone(),
    })
}
