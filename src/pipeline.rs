// src/pipeline.rs
//! fetch → extract → classify → reconcile, behind the primary status cache.
//!
//! One refresh runs at a time. Callers that find the cache stale while a
//! refresh is in flight wait for it and share its outcome instead of starting
//! their own. A failed cycle never touches the caches: the previous snapshot
//! (of any age) is served with a warning, and only a cold start surfaces the
//! error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use serde::Serialize;

use crate::cache::{age, Clock, LastGoodStore, SystemClock, TtlCache};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::extract::{merge, number_order, Extraction, Extractor};
use crate::fetch::{Fetcher, HttpFetcher};
use crate::lines::CATALOG;
use crate::model::{CandidateLine, DataQuality, LineStatus, SnapshotSource};
use crate::reason::ReasonIndex;
use crate::reconcile::Reconciler;

/// Finalized lines plus cache provenance, as handed to the API layer.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub lines: Arc<Vec<LineStatus>>,
    pub cached: bool,
    pub warning: Option<String>,
    pub source: SnapshotSource,
    /// When the served lines were produced.
    pub updated_at: DateTime<Utc>,
}

impl StatusSnapshot {
    pub fn problems(&self) -> impl Iterator<Item = &LineStatus> {
        self.lines.iter().filter(|l| l.is_problem())
    }
}

/// Diagnostics for the most recent cycle. Field names are camelCase because
/// external uptime monitors read `parsedCount` and `lastError` from `/debug`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub source_url: Option<String>,
    pub strategy: Option<&'static str>,
    pub parsed_count: usize,
    pub duplicates_dropped: usize,
    pub live: usize,
    pub fallback: usize,
    pub unavailable: usize,
    pub reason_rows: usize,
    pub last_error: Option<String>,
    pub error_kind: Option<&'static str>,
}

pub struct StatusPipeline {
    cfg: PipelineConfig,
    fetcher: Arc<dyn Fetcher>,
    extractor: Extractor,
    clock: Arc<dyn Clock>,
    primary: TtlCache<Arc<Vec<LineStatus>>>,
    reasons: TtlCache<Arc<ReasonIndex>>,
    last_good: LastGoodStore,
    refresh_lock: tokio::sync::Mutex<()>,
    cycles: AtomicU64,
    last_outcome: Mutex<Option<Result<StatusSnapshot>>>,
    report: RwLock<Option<CycleReport>>,
}

impl StatusPipeline {
    pub fn new(cfg: PipelineConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            primary: TtlCache::new(cfg.status_ttl()),
            reasons: TtlCache::new(cfg.reason_ttl()),
            last_good: LastGoodStore::new(cfg.last_good_ttl()),
            cfg,
            fetcher,
            extractor: Extractor::default(),
            clock: Arc::new(SystemClock),
            refresh_lock: tokio::sync::Mutex::new(()),
            cycles: AtomicU64::new(0),
            last_outcome: Mutex::new(None),
            report: RwLock::new(None),
        }
    }

    /// Pipeline over real HTTP.
    pub fn from_config(cfg: PipelineConfig) -> anyhow::Result<Self> {
        let fetcher = HttpFetcher::new(&cfg)?;
        Ok(Self::new(cfg, Arc::new(fetcher)))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_extractor(mut self, extractor: Extractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Serve the primary cache while valid, otherwise refresh it.
    pub async fn get_or_refresh(&self) -> Result<StatusSnapshot> {
        // Read before the freshness check so a cycle finishing in between is
        // still seen as "someone else refreshed".
        let seen = self.cycles.load(Ordering::SeqCst);
        if let Some(s) = self.fresh_snapshot() {
            counter!("status_cache_hits_total").increment(1);
            return Ok(s);
        }

        let _guard = self.refresh_lock.lock().await;

        if let Some(s) = self.fresh_snapshot() {
            counter!("status_cache_hits_total").increment(1);
            return Ok(s);
        }
        if self.cycles.load(Ordering::SeqCst) != seen {
            // Another caller ran a cycle while we waited; share its outcome.
            let shared = self.last_outcome().clone();
            if let Some(outcome) = shared {
                return outcome;
            }
        }

        let outcome = self.run_cycle().await;
        *self.last_outcome() = Some(outcome.clone());
        self.cycles.fetch_add(1, Ordering::SeqCst);
        outcome
    }

    /// Expire the primary cache and refresh through the same single-flight guard.
    pub async fn force_refresh(&self) -> Result<StatusSnapshot> {
        self.primary.expire();
        self.get_or_refresh().await
    }

    pub fn last_report(&self) -> Option<CycleReport> {
        self.report.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Age of the stored primary snapshot, whether or not it is still valid.
    pub fn cache_age(&self) -> Option<Duration> {
        self.primary
            .get_any()
            .map(|e| age(self.clock.now(), e.stored_at))
    }

    pub fn has_cached_data(&self) -> bool {
        self.primary.get_any().is_some()
    }

    pub fn last_good_len(&self) -> usize {
        self.last_good.len()
    }

    fn fresh_snapshot(&self) -> Option<StatusSnapshot> {
        let now = self.clock.now();
        let entry = self.primary.get_any().filter(|e| e.is_valid(now))?;
        Some(StatusSnapshot {
            lines: entry.value,
            cached: true,
            warning: None,
            source: SnapshotSource::Cache,
            updated_at: entry.stored_at,
        })
    }

    fn last_outcome(&self) -> std::sync::MutexGuard<'_, Option<Result<StatusSnapshot>>> {
        self.last_outcome.lock().unwrap_or_else(|p| p.into_inner())
    }

    async fn run_cycle(&self) -> Result<StatusSnapshot> {
        let started_at = self.clock.now();
        let t0 = Instant::now();
        let mut report = CycleReport {
            started_at: Some(started_at),
            ..CycleReport::default()
        };

        let (status, reasons) = tokio::join!(self.fetch_status(), self.reason_index());
        report.reason_rows = reasons.rows();

        let outcome = match status {
            Ok((url, extraction)) => {
                let now = self.clock.now();
                let lines = self.reconcile_all(&extraction, &reasons, now);
                report.source_url = Some(url);
                report.strategy = extraction.strategy;
                report.parsed_count = extraction.candidates.len();
                report.duplicates_dropped = extraction.duplicates_dropped;
                for l in lines.iter() {
                    match l.data_quality {
                        DataQuality::Live => report.live += 1,
                        DataQuality::FallbackLastGood => report.fallback += 1,
                        DataQuality::Unavailable => report.unavailable += 1,
                    }
                }

                let lines = Arc::new(lines);
                self.primary.set(lines.clone(), now);
                gauge!("status_last_refresh_ts").set(now.timestamp() as f64);
                tracing::info!(
                    target: "pipeline",
                    lines = lines.len(),
                    live = report.live,
                    fallback = report.fallback,
                    unavailable = report.unavailable,
                    "refresh ok"
                );
                Ok(StatusSnapshot {
                    lines,
                    cached: false,
                    warning: None,
                    source: SnapshotSource::Live,
                    updated_at: now,
                })
            }
            Err(e) => {
                counter!("status_cycle_failures_total", "kind" => e.kind()).increment(1);
                report.last_error = Some(e.to_string());
                report.error_kind = Some(e.kind());
                match self.primary.get_any() {
                    Some(prev) => {
                        counter!("status_stale_served_total").increment(1);
                        tracing::warn!(target: "pipeline", error = %e, stored_at = %prev.stored_at, "refresh failed, serving previous snapshot");
                        Ok(StatusSnapshot {
                            lines: prev.value,
                            cached: true,
                            warning: Some(format!("upstream refresh failed, serving cached data: {e}")),
                            source: SnapshotSource::CacheFallback,
                            updated_at: prev.stored_at,
                        })
                    }
                    None => {
                        tracing::warn!(target: "pipeline", error = %e, "refresh failed with no cached data");
                        Err(e)
                    }
                }
            }
        };

        let elapsed = t0.elapsed();
        histogram!("status_refresh_ms").record(elapsed.as_secs_f64() * 1_000.0);
        report.duration_ms = elapsed.as_millis() as u64;
        report.finished_at = Some(self.clock.now());
        *self.report.write().unwrap_or_else(|p| p.into_inner()) = Some(report);
        outcome
    }

    /// Candidates for this cycle: the first `status_urls` entry that yields
    /// lines, merged with every `merged_status_urls` source that does. Fails
    /// only when no source produced anything.
    async fn fetch_status(&self) -> Result<(String, Extraction)> {
        let primary = self.fetch_first(&self.cfg.status_urls).await;
        if self.cfg.merged_status_urls.is_empty() {
            return primary;
        }

        let mut urls: Vec<String> = Vec::new();
        let mut parts: Vec<Extraction> = Vec::new();
        let mut first_err: Option<PipelineError> = None;
        match primary {
            Ok((url, ex)) => {
                urls.push(url);
                parts.push(ex);
            }
            Err(PipelineError::NoSources) => {}
            Err(e) => first_err = Some(e),
        }
        for url in &self.cfg.merged_status_urls {
            match self.fetch_source(url).await {
                Ok(ex) => {
                    urls.push(url.clone());
                    parts.push(ex);
                }
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }

        if parts.is_empty() {
            return Err(first_err.unwrap_or(PipelineError::NoSources));
        }
        if let Some(e) = first_err {
            tracing::warn!(target: "pipeline", error = %e, sources = urls.len(), "serving lines from the sources that answered");
        }
        Ok((urls.join(" + "), merge(parts)))
    }

    /// First source in `urls` whose document yields at least one candidate.
    async fn fetch_first(&self, urls: &[String]) -> Result<(String, Extraction)> {
        let mut no_data: Option<PipelineError> = None;
        let mut fetch_err: Option<PipelineError> = None;

        for url in urls {
            match self.fetch_source(url).await {
                Ok(extraction) => return Ok((url.clone(), extraction)),
                Err(e @ PipelineError::NoDataExtracted { .. }) => no_data = Some(e),
                Err(e) => fetch_err = Some(e),
            }
        }

        Err(no_data.or(fetch_err).unwrap_or(PipelineError::NoSources))
    }

    async fn fetch_source(&self, url: &str) -> Result<Extraction> {
        let doc = self.fetcher.fetch(url).await.map_err(|e| {
            tracing::warn!(target: "pipeline", url = %url, error = %e, "status source unreachable");
            PipelineError::from(e)
        })?;
        let extraction = self.extractor.extract(&doc.body);
        if extraction.is_empty() {
            tracing::warn!(target: "pipeline", url = %url, status = doc.status, "no lines extracted");
            return Err(PipelineError::NoDataExtracted { url: url.to_string() });
        }
        tracing::debug!(
            target: "pipeline",
            url = %url,
            fetched_at = %doc.fetched_at,
            lines = extraction.candidates.len(),
            "status source read"
        );
        Ok(extraction)
    }

    /// Reason index from its own cache; a failed or disabled feed never fails
    /// the cycle. On failure the previous index (any age) is reused.
    async fn reason_index(&self) -> Arc<ReasonIndex> {
        let Some(url) = self.cfg.reason_url.as_deref() else {
            return Arc::new(ReasonIndex::default());
        };
        if let Some(idx) = self.reasons.get(self.clock.now()) {
            return idx;
        }
        match self.fetcher.fetch(url).await {
            Ok(doc) => {
                let idx = Arc::new(ReasonIndex::parse(&doc.body, url));
                self.reasons.set(idx.clone(), self.clock.now());
                idx
            }
            Err(e) => {
                tracing::warn!(target: "reason", error = %e, "reason feed unavailable");
                self.reasons.get_any().map(|e| e.value).unwrap_or_default()
            }
        }
    }

    fn reconcile_all(
        &self,
        extraction: &Extraction,
        reasons: &ReasonIndex,
        now: DateTime<Utc>,
    ) -> Vec<LineStatus> {
        let reconciler = Reconciler {
            last_good: &self.last_good,
            reasons,
            reason_source: self.cfg.reason_url.as_deref(),
        };

        let mut lines: Vec<LineStatus> = extraction
            .candidates
            .iter()
            .map(|c| reconciler.reconcile(c, now))
            .collect();

        if self.cfg.fill_missing_from_catalog {
            let missing: Vec<CandidateLine> = CATALOG
                .iter()
                .filter(|cl| !lines.iter().any(|l| l.id == cl.id || l.number == cl.number))
                .map(|cl| {
                    let mut c = CandidateLine::new(cl.number, "catalog");
                    c.color = Some(cl.color.to_string());
                    c
                })
                .collect();
            if !missing.is_empty() {
                tracing::debug!(target: "pipeline", missing = missing.len(), "filling lines absent from source");
            }
            lines.extend(missing.iter().map(|c| reconciler.reconcile(c, now)));
            lines.sort_by_key(|l| number_order(&l.number));
        }
        lines
    }
}
