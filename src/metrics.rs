// src/metrics.rs
//! Prometheus recorder and the series the pipeline emits.

use anyhow::Context;
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("status_fetch_attempts_total", "HTTP attempts against upstream sources.");
        describe_counter!(
            "status_fetch_errors_total",
            "Fetches that failed after exhausting retries."
        );
        describe_counter!(
            "status_extract_candidates_total",
            "Candidate lines recovered, labelled by the strategy that produced them."
        );
        describe_counter!(
            "status_cycle_failures_total",
            "Refresh cycles that ended without a new snapshot."
        );
        describe_counter!("status_cache_hits_total", "Requests served from a valid primary cache.");
        describe_counter!(
            "status_stale_served_total",
            "Failed cycles answered with an expired snapshot."
        );
        describe_counter!(
            "status_lines_fallback_total",
            "Lines served from their last-known-good value."
        );
        describe_counter!(
            "status_lines_unavailable_total",
            "Lines reported unavailable with no usable last-known-good value."
        );
        describe_counter!("status_refresher_ticks_total", "Periodic refresher wake-ups.");
        describe_histogram!("status_refresh_ms", "Refresh cycle duration in milliseconds.");
        describe_gauge!(
            "status_last_refresh_ts",
            "Unix ts of the last successful refresh cycle."
        );
        describe_gauge!("status_cache_ttl_secs", "Configured primary cache TTL.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder (once per process) and publish the TTL gauge.
    /// Later calls reuse the installed recorder.
    pub fn init(ttl_secs: u64) -> anyhow::Result<Self> {
        static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();
        let handle = HANDLE
            .get_or_try_init(|| {
                PrometheusBuilder::new()
                    .install_recorder()
                    .context("prometheus: install recorder")
            })?
            .clone();

        ensure_metrics_described();
        gauge!("status_cache_ttl_secs").set(ttl_secs as f64);

        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
