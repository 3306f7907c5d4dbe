// src/reconcile.rs
//! Candidate + history → final `LineStatus`.
//!
//! Per line and per cycle the result is one of: live (normal or degraded),
//! fallback to the last-known-good value, or unavailable. Only live results
//! write the last-known-good store, and a fallback never refreshes the stored
//! timestamp, so one good read cannot stretch the fallback window.

use chrono::{DateTime, Utc};
use metrics::counter;

use crate::cache::LastGoodStore;
use crate::classify::{classify, is_unavailable_text, UNAVAILABLE_TEXT};
use crate::lines::{self, CatalogLine};
use crate::model::{CandidateLine, DataQuality, LineStatus, StatusCode};
use crate::reason::ReasonIndex;

/// Attached to every non-normal line whose incident was not found in the feed.
pub const REASON_PLACEHOLDER: &str = "Motivo não informado pela fonte oficial";

pub const FALLBACK_NOTE: &str =
    "Fonte oficial sem dados no momento; exibindo o último status conhecido";
pub const UNAVAILABLE_NOTE: &str = "Fonte oficial sem dados para esta linha";

pub struct Reconciler<'a> {
    pub last_good: &'a LastGoodStore,
    pub reasons: &'a ReasonIndex,
    /// Feed URL reported when no record matched.
    pub reason_source: Option<&'a str>,
}

impl Reconciler<'_> {
    pub fn reconcile(&self, candidate: &CandidateLine, now: DateTime<Utc>) -> LineStatus {
        let raw = candidate.raw_status.as_deref().unwrap_or_default();

        let line = if !is_unavailable_text(raw) {
            let live = self.attach_reason(live_status(candidate, raw, now));
            self.last_good.set(&live.id, live.clone(), now);
            live
        } else {
            let id = candidate.line_id();
            match self.last_good.get(&id, now) {
                Some(entry) => {
                    counter!("status_lines_fallback_total").increment(1);
                    tracing::info!(target: "pipeline", line = %id, saved_at = %entry.saved_at, "serving last-known-good");
                    let mut v = entry.value.without_reason();
                    v.data_quality = DataQuality::FallbackLastGood;
                    v.note = Some(FALLBACK_NOTE.to_string());
                    self.attach_reason(v)
                }
                None => {
                    counter!("status_lines_unavailable_total").increment(1);
                    tracing::info!(target: "pipeline", line = %id, "line unavailable");
                    self.attach_reason(unavailable_status(candidate, id, now))
                }
            }
        };

        if line.status_code == StatusCode::Unknown && line.data_quality == DataQuality::Live {
            tracing::debug!(target: "pipeline", line = %line.id, status = %line.status_text, "unclassified status phrase");
        }
        line
    }

    fn attach_reason(&self, mut line: LineStatus) -> LineStatus {
        if line.status_code == StatusCode::Normal {
            return line.without_reason();
        }
        match self.reasons.lookup(&line.number, line.color.as_deref()) {
            Some((record, kind)) => {
                let text = record.description.trim();
                line.reason = Some(if text.is_empty() {
                    REASON_PLACEHOLDER.to_string()
                } else {
                    text.to_string()
                });
                line.reason_timestamp = Some(record.timestamp.clone()).filter(|s| !s.is_empty());
                line.reason_source_status = Some(record.situation.clone()).filter(|s| !s.is_empty());
                line.reason_source = Some(record.source.clone());
                line.reason_match = Some(kind);
            }
            None => {
                line.reason = Some(REASON_PLACEHOLDER.to_string());
                line.reason_source = self.reason_source.map(str::to_string);
            }
        }
        line
    }
}

fn catalog_for(candidate: &CandidateLine) -> Option<&'static CatalogLine> {
    lines::by_number(&candidate.number)
}

fn base_status(candidate: &CandidateLine, id: String, now: DateTime<Utc>) -> LineStatus {
    let catalog = catalog_for(candidate);
    let color = candidate.resolved_color();
    let number = candidate.number.trim().to_string();
    let name = match (catalog, color.as_deref()) {
        (Some(l), _) => l.name.clone(),
        (None, Some(c)) => format!("Linha {number} - {c}"),
        (None, None) => format!("Linha {number}"),
    };
    LineStatus {
        id,
        name,
        operator: catalog.map(|l| l.operator.as_str().to_string()),
        color_hex: catalog.map(|l| l.color_hex.to_string()),
        color,
        number,
        status_text: UNAVAILABLE_TEXT.to_string(),
        status_code: StatusCode::Unknown,
        data_quality: DataQuality::Unavailable,
        reason: None,
        reason_timestamp: None,
        reason_source_status: None,
        reason_source: None,
        reason_match: None,
        note: None,
        station_count: candidate
            .station_count
            .or_else(|| catalog.map(|l| l.stations.len() as u32)),
        source_updated_at: candidate.updated_at.clone(),
        observed_at: now,
    }
}

fn live_status(candidate: &CandidateLine, raw: &str, now: DateTime<Utc>) -> LineStatus {
    let mut s = base_status(candidate, candidate.line_id(), now);
    s.status_text = raw.trim().to_string();
    s.status_code = classify(raw);
    s.data_quality = DataQuality::Live;
    s
}

fn unavailable_status(candidate: &CandidateLine, id: String, now: DateTime<Utc>) -> LineStatus {
    let mut s = base_status(candidate, id, now);
    s.note = Some(UNAVAILABLE_NOTE.to_string());
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ReasonMatch;
    use chrono::TimeZone;
    use std::time::Duration;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap()
    }

    fn cand(number: &str, color: &str, status: Option<&str>) -> CandidateLine {
        let mut c = CandidateLine::new(number, "test");
        c.color = Some(color.into());
        c.raw_status = status.map(str::to_string);
        c
    }

    const FEED: &str = r#"<table>
<tr><td>15/01 11:50</td><td>Linha 3 - Vermelha</td><td>Metrô</td><td>Velocidade reduzida</td></tr>
<tr><td colspan="4">Falha de sinalização entre Sé e Brás.</td></tr>
</table>"#;

    #[test]
    fn live_lines_fill_catalog_fields_and_write_last_good() {
        let store = LastGoodStore::new(Duration::from_secs(900));
        let reasons = ReasonIndex::default();
        let r = Reconciler { last_good: &store, reasons: &reasons, reason_source: None };

        let s = r.reconcile(&cand("1", "Azul", Some("Operação Normal")), t0());
        assert_eq!(s.id, "linha-1-azul");
        assert_eq!(s.status_code, StatusCode::Normal);
        assert_eq!(s.data_quality, DataQuality::Live);
        assert_eq!(s.operator.as_deref(), Some("metro"));
        assert_eq!(s.color_hex.as_deref(), Some("#0455A1"));
        assert!(s.reason.is_none());
        assert_eq!(store.get("linha-1-azul", t0()).map(|e| e.value.status_text), Some("Operação Normal".into()));
    }

    #[test]
    fn degraded_line_gets_feed_reason_or_placeholder() {
        let store = LastGoodStore::new(Duration::from_secs(900));
        let reasons = ReasonIndex::parse(FEED, "https://feed.example/");
        let r = Reconciler { last_good: &store, reasons: &reasons, reason_source: Some("https://feed.example/") };

        let s = r.reconcile(&cand("3", "Vermelha", Some("Velocidade Reduzida")), t0());
        assert_eq!(s.status_code, StatusCode::Reduced);
        assert_eq!(s.reason.as_deref(), Some("Falha de sinalização entre Sé e Brás."));
        assert_eq!(s.reason_match, Some(ReasonMatch::Exact));
        assert_eq!(s.reason_source_status.as_deref(), Some("Velocidade reduzida"));

        let s = r.reconcile(&cand("12", "Safira", Some("Paralisada")), t0());
        assert_eq!(s.status_code, StatusCode::Halted);
        assert_eq!(s.reason.as_deref(), Some(REASON_PLACEHOLDER));
        assert_eq!(s.reason_source.as_deref(), Some("https://feed.example/"));
        assert!(s.reason_match.is_none());
    }

    #[test]
    fn fallback_window_is_inclusive_and_not_extended() {
        let store = LastGoodStore::new(Duration::from_secs(900));
        let reasons = ReasonIndex::default();
        let r = Reconciler { last_good: &store, reasons: &reasons, reason_source: None };

        r.reconcile(&cand("3", "Vermelha", Some("Velocidade Reduzida")), t0());

        let at_edge = t0() + chrono::Duration::seconds(900);
        let s = r.reconcile(&cand("3", "Vermelha", Some("indisponível")), at_edge);
        assert_eq!(s.data_quality, DataQuality::FallbackLastGood);
        assert_eq!(s.status_text, "Velocidade Reduzida");
        assert_eq!(s.status_code, StatusCode::Reduced);
        assert_eq!(s.observed_at, t0());
        assert_eq!(s.note.as_deref(), Some(FALLBACK_NOTE));
        assert_eq!(s.reason.as_deref(), Some(REASON_PLACEHOLDER));

        let past = at_edge + chrono::Duration::seconds(1);
        let s = r.reconcile(&cand("3", "Vermelha", None), past);
        assert_eq!(s.data_quality, DataQuality::Unavailable);
        assert_eq!(s.status_code, StatusCode::Unknown);
        assert_eq!(s.status_text, UNAVAILABLE_TEXT);
        assert!(s.reason.is_some());
    }

    #[test]
    fn fallback_of_normal_line_carries_no_reason() {
        let store = LastGoodStore::new(Duration::from_secs(900));
        let reasons = ReasonIndex::parse(FEED, "feed");
        let r = Reconciler { last_good: &store, reasons: &reasons, reason_source: None };

        r.reconcile(&cand("3", "Vermelha", Some("Operação Normal")), t0());
        let s = r.reconcile(&cand("3", "Vermelha", Some("-")), t0());
        assert_eq!(s.data_quality, DataQuality::FallbackLastGood);
        assert_eq!(s.status_code, StatusCode::Normal);
        assert!(s.reason.is_none());
    }

    #[test]
    fn missing_color_uses_catalog() {
        let store = LastGoodStore::new(Duration::from_secs(900));
        let reasons = ReasonIndex::default();
        let r = Reconciler { last_good: &store, reasons: &reasons, reason_source: None };
        let mut c = CandidateLine::new("5", "test");
        c.raw_status = Some("Operação Normal".into());
        let s = r.reconcile(&c, t0());
        assert_eq!(s.id, "linha-5-lilas");
        assert_eq!(s.color.as_deref(), Some("Lilás"));
    }
}
