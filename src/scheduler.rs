// src/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::task::JoinHandle;

use crate::pipeline::StatusPipeline;

/// Spawn a lightweight refresher that keeps the primary cache warm.
/// Failures are logged and the loop keeps going.
pub fn spawn_refresher(pipeline: Arc<StatusPipeline>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            counter!("status_refresher_ticks_total").increment(1);
            match pipeline.get_or_refresh().await {
                Ok(snap) => tracing::info!(
                    target: "scheduler",
                    lines = snap.lines.len(),
                    cached = snap.cached,
                    warning = snap.warning.as_deref().unwrap_or(""),
                    "refresher tick"
                ),
                Err(e) => tracing::warn!(target: "scheduler", error = %e, "refresher tick failed"),
            }
        }
    })
}
