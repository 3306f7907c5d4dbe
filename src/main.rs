//! Line status service: binary entrypoint.
//! Loads config, builds the pipeline, keeps its cache warm in the background
//! and serves the Axum router.

use std::sync::Arc;

use line_status::{scheduler::spawn_refresher, PipelineConfig, StatusPipeline};
use shuttle_axum::ShuttleAxum;

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    line_status::init_tracing();

    let cfg = PipelineConfig::load()?;
    tracing::info!(
        sources = ?cfg.status_urls,
        reason = ?cfg.reason_url,
        ttl_secs = cfg.status_cache_ttl_secs,
        "pipeline config loaded"
    );

    let pipeline = Arc::new(StatusPipeline::from_config(cfg)?);
    spawn_refresher(pipeline.clone(), pipeline.config().refresh_interval());

    let router = line_status::app(pipeline)?;
    Ok(router.into())
}
