// src/extract/mod.rs
//! Raw document → ordered candidate line records.
//!
//! Strategies are tried in priority order and the first one that yields any
//! candidate wins. The result is de-duplicated by `(number, color)` keeping the
//! first occurrence, then sorted by numeric line number (non-numeric last).
//! Extractions from independent sources are combined with [`merge`].

pub mod html;
pub mod strategies;

use std::collections::HashSet;

use metrics::counter;

use crate::model::CandidateLine;
use html::Dom;
use strategies::{FullTextStrategy, HeadingStrategy, JsonFeedStrategy, ListItemStrategy, Strategy};

/// A fetched document, parsed once and shared by every strategy.
pub struct Page {
    pub raw: String,
    pub dom: Dom,
}

impl Page {
    pub fn parse(document: &str) -> Self {
        Self {
            raw: document.to_string(),
            dom: Dom::parse(document),
        }
    }
}

/// Outcome of one extraction. Empty `candidates` means no strategy matched.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub candidates: Vec<CandidateLine>,
    pub strategy: Option<&'static str>,
    pub duplicates_dropped: usize,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

pub struct Extractor {
    strategies: Vec<Box<dyn Strategy>>,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(vec![
            Box::new(JsonFeedStrategy),
            Box::new(HeadingStrategy),
            Box::new(ListItemStrategy),
            Box::new(FullTextStrategy),
        ])
    }
}

impl Extractor {
    pub fn new(strategies: Vec<Box<dyn Strategy>>) -> Self {
        Self { strategies }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Never fails; malformed markup just yields fewer (or zero) candidates.
    pub fn extract(&self, document: &str) -> Extraction {
        let page = Page::parse(document);

        for strategy in &self.strategies {
            let raw = strategy.extract(&page);
            let raw: Vec<CandidateLine> = raw.into_iter().filter(is_well_formed).collect();
            if raw.is_empty() {
                tracing::debug!(target: "extract", strategy = strategy.name(), "no candidates");
                continue;
            }

            let found = raw.len();
            let candidates = dedup_and_sort(raw);
            let duplicates_dropped = found - candidates.len();
            counter!("status_extract_candidates_total", "strategy" => strategy.name())
                .increment(candidates.len() as u64);
            tracing::info!(
                target: "extract",
                strategy = strategy.name(),
                candidates = candidates.len(),
                duplicates = duplicates_dropped,
                "extracted"
            );
            return Extraction {
                candidates,
                strategy: Some(strategy.name()),
                duplicates_dropped,
            };
        }

        Extraction::default()
    }
}

/// Combine extractions from independent sources (one per operator, say).
/// Earlier extractions win on key collisions.
pub fn merge(parts: Vec<Extraction>) -> Extraction {
    let strategy = parts.iter().find_map(|p| p.strategy);
    let mut dropped: usize = parts.iter().map(|p| p.duplicates_dropped).sum();
    let raw: Vec<CandidateLine> = parts.into_iter().flat_map(|p| p.candidates).collect();
    let found = raw.len();
    let candidates = dedup_and_sort(raw);
    dropped += found - candidates.len();
    Extraction {
        candidates,
        strategy,
        duplicates_dropped: dropped,
    }
}

fn is_well_formed(c: &CandidateLine) -> bool {
    let ok = !c.number.trim().is_empty();
    if !ok {
        tracing::debug!(target: "extract", strategy = c.strategy, "candidate without number skipped");
    }
    ok
}

/// First occurrence of each `(number, color)` wins; then stable sort by number.
pub fn dedup_and_sort(raw: Vec<CandidateLine>) -> Vec<CandidateLine> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut out: Vec<CandidateLine> = raw
        .into_iter()
        .filter(|c| seen.insert(c.key()))
        .collect();
    out.sort_by_key(|c| number_order(&c.number));
    out
}

/// Sort key for line numbers: numeric ascending, non-numeric after all of them.
pub fn number_order(number: &str) -> (u8, u32) {
    match number.trim().parse::<u32>() {
        Ok(n) => (0, n),
        Err(_) => (1, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(number: &str, color: &str, status: &str) -> CandidateLine {
        CandidateLine {
            number: number.into(),
            color: Some(color.into()),
            raw_status: Some(status.into()),
            station_count: None,
            updated_at: None,
            strategy: "test",
        }
    }

    #[test]
    fn first_duplicate_wins_and_numbers_sort_numerically() {
        let raw = vec![
            cand("10", "Turquesa", "Operação Normal"),
            cand("2", "Verde", "Velocidade Reduzida"),
            cand("A", "Expresso", "Operação Normal"),
            cand("2", "verde", "Paralisada"),
            cand("1", "Azul", "Operação Normal"),
        ];
        let out = dedup_and_sort(raw);
        let numbers: Vec<&str> = out.iter().map(|c| c.number.as_str()).collect();
        assert_eq!(numbers, vec!["1", "2", "10", "A"]);
        assert_eq!(out[1].raw_status.as_deref(), Some("Velocidade Reduzida"));
    }

    #[test]
    fn accent_and_case_variants_share_one_key() {
        let raw = vec![
            cand("5", "Lilás", "Operação Normal"),
            cand("5", "LILAS", "Paralisada"),
            CandidateLine {
                color: None,
                ..cand("5", "", "Velocidade Reduzida")
            },
            cand(" 9 ", "Esmeralda", "Operação Normal"),
            cand("9", "esmeralda", "Paralisada"),
        ];
        let out = dedup_and_sort(raw);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].raw_status.as_deref(), Some("Operação Normal"));
        assert_eq!(out[0].line_id(), "linha-5-lilas");
        assert_eq!(out[1].line_id(), "linha-9-esmeralda");
    }

    #[test]
    fn default_order_puts_structured_feeds_first() {
        assert_eq!(
            Extractor::default().strategy_names(),
            vec!["json", "heading", "list", "fulltext"]
        );
    }

    #[test]
    fn merge_keeps_earlier_source_on_collision() {
        let metro = Extraction {
            candidates: vec![cand("1", "Azul", "Operação Normal"), cand("9", "Esmeralda", "Paralisada")],
            strategy: Some("heading"),
            duplicates_dropped: 1,
        };
        let cptm = Extraction {
            candidates: vec![cand("8", "Diamante", "Operação Normal"), cand("9", "Esmeralda", "Operação Normal")],
            strategy: Some("json"),
            duplicates_dropped: 0,
        };
        let out = merge(vec![metro, cptm]);
        let numbers: Vec<&str> = out.candidates.iter().map(|c| c.number.as_str()).collect();
        assert_eq!(numbers, vec!["1", "8", "9"]);
        assert_eq!(out.candidates[2].raw_status.as_deref(), Some("Paralisada"));
        assert_eq!(out.duplicates_dropped, 2);
        assert_eq!(out.strategy, Some("heading"));
    }

    #[test]
    fn empty_document_yields_nothing() {
        let ex = Extractor::default().extract("");
        assert!(ex.is_empty());
        assert!(ex.strategy.is_none());
    }

    struct Fixed(&'static str, Vec<CandidateLine>);

    impl Strategy for Fixed {
        fn name(&self) -> &'static str {
            self.0
        }
        fn extract(&self, _page: &Page) -> Vec<CandidateLine> {
            self.1.clone()
        }
    }

    #[test]
    fn falls_through_to_next_strategy_only_when_empty() {
        let ex = Extractor::new(vec![
            Box::new(Fixed("first", vec![])),
            Box::new(Fixed("second", vec![cand("3", "Vermelha", "Operação Normal")])),
            Box::new(Fixed("third", vec![cand("4", "Amarela", "Operação Normal")])),
        ]);
        let out = ex.extract("<html></html>");
        assert_eq!(out.strategy, Some("second"));
        assert_eq!(out.candidates.len(), 1);
        assert_eq!(out.candidates[0].number, "3");
    }

    #[test]
    fn candidates_without_number_are_skipped() {
        let ex = Extractor::new(vec![Box::new(Fixed(
            "only",
            vec![cand(" ", "Azul", "x"), cand("1", "Azul", "Operação Normal")],
        ))]);
        let out = ex.extract("");
        assert_eq!(out.candidates.len(), 1);
    }
}
