// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod cache;
pub mod classify;
pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod lines;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod reason;
pub mod reconcile;
pub mod scheduler;

// ---- Re-exports for stable public API ----
pub use crate::config::PipelineConfig;
pub use crate::error::{FetchError, PipelineError};
pub use crate::model::{DataQuality, LineStatus, SnapshotSource, StatusCode};
pub use crate::pipeline::{CycleReport, StatusPipeline, StatusSnapshot};

use std::sync::Arc;

use axum::Router;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Compact logs by default, JSON when `LOG_FORMAT=json`. Safe to call twice.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("line_status=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    let res = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing already initialised");
    }
}

/// Full router: API routes plus `/metrics`.
pub fn app(pipeline: Arc<StatusPipeline>) -> anyhow::Result<Router> {
    let metrics = crate::metrics::Metrics::init(pipeline.config().status_cache_ttl_secs)?;
    Ok(api::router(api::AppState::new(pipeline)).merge(metrics.router()))
}
