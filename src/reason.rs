// src/reason.rs
//! Incident ("reason") feed: an HTML table of occurrences per line.
//!
//! Row layout: `td[0]` date/time, `td[1]` line text, `td[3]` situation. A row
//! right after it with at most two cells and more than 10 chars of text is the
//! incident description. The feed lists newest first, so the first row seen
//! for a key wins.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::extract::html::Dom;
use crate::lines::{self, CATALOG};
use crate::model::{ReasonMatch, ReasonRecord};

static RE_LINE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})\b").expect("line number regex"));

const MIN_DESCRIPTION_CHARS: usize = 10;

/// Reason records indexed by composite `<number>-<color>` key and by bare number.
#[derive(Debug, Clone, Default)]
pub struct ReasonIndex {
    by_key: HashMap<String, ReasonRecord>,
    rows: usize,
}

pub fn composite_key(number: &str, color: &str) -> String {
    format!("{}-{}", number.trim(), lines::color_slug(color))
}

fn number_key(number: &str) -> String {
    number.trim().trim_start_matches('0').to_string()
}

impl ReasonIndex {
    pub fn parse(html: &str, source: &str) -> Self {
        let dom = Dom::parse(html);
        let rows = dom.elements_by_tag(&["tr"]);
        let mut index = Self::default();

        for (i, &tr) in rows.iter().enumerate() {
            let cells = row_cells(&dom, tr);
            if cells.len() < 4 {
                continue;
            }
            let line_text = dom.text(cells[1]);
            let Some(number) = RE_LINE_NUMBER
                .captures(&line_text)
                .and_then(|c| c.get(1))
                .map(|m| number_key(m.as_str()))
            else {
                tracing::trace!(target: "reason", line = %line_text, "row without line number");
                continue;
            };

            let description = rows
                .get(i + 1)
                .filter(|&&next| !dom.contains(tr, next))
                .and_then(|&next| {
                    let text = dom.text(next);
                    (row_cells(&dom, next).len() <= 2
                        && text.chars().count() > MIN_DESCRIPTION_CHARS)
                        .then_some(text)
                })
                .unwrap_or_default();

            let record = ReasonRecord {
                line_text: line_text.clone(),
                description,
                timestamp: dom.text(cells[0]),
                situation: dom.text(cells[3]),
                source: source.to_string(),
            };
            index.rows += 1;

            if let Some(color) = color_in(&line_text) {
                index
                    .by_key
                    .entry(composite_key(&number, color))
                    .or_insert_with(|| record.clone());
            }
            index.by_key.entry(number).or_insert(record);
        }

        tracing::debug!(target: "reason", rows = index.rows, keys = index.by_key.len(), "reason feed parsed");
        index
    }

    /// Exact composite key first, then the bare line number.
    pub fn lookup(&self, number: &str, color: Option<&str>) -> Option<(&ReasonRecord, ReasonMatch)> {
        if let Some(c) = color.filter(|c| !c.trim().is_empty()) {
            if let Some(r) = self.by_key.get(&composite_key(&number_key(number), c)) {
                return Some((r, ReasonMatch::Exact));
            }
        }
        self.by_key
            .get(&number_key(number))
            .map(|r| (r, ReasonMatch::NumberOnly))
    }

    /// Incident rows that carried a line number.
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// `td`s whose nearest enclosing row is `tr` (nested tables excluded).
fn row_cells(dom: &Dom, tr: usize) -> Vec<usize> {
    dom.elements_by_tag(&["td"])
        .into_iter()
        .filter(|&td| dom.contains(tr, td))
        .filter(|&td| dom.ancestors(td).find(|&a| dom.tag(a) == Some("tr")) == Some(tr))
        .collect()
}

/// Catalog color named in a free line description ("Linha 9 - Esmeralda").
fn color_in(text: &str) -> Option<&'static str> {
    let folded = lines::fold_accents(text).to_lowercase();
    CATALOG
        .iter()
        .map(|l| l.color)
        .find(|c| folded.contains(&lines::fold_accents(c).to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"
<table><tbody>
<tr><td>15/01/2026 08:10</td><td>Linha 9 - Esmeralda</td><td>CPTM</td><td>Velocidade reduzida</td></tr>
<tr><td colspan="4">Falha em equipamento de via próximo à estação Pinheiros.</td></tr>
<tr><td>15/01/2026 07:00</td><td>Linha 9 - Esmeralda</td><td>CPTM</td><td>Normalizada</td></tr>
<tr><td colspan="4">Ocorrência anterior já encerrada pela operação.</td></tr>
<tr><td>15/01/2026 06:40</td><td>Linha 11</td><td>CPTM</td><td>Paralisada</td></tr>
<tr><td>curta</td></tr>
</tbody></table>"#;

    #[test]
    fn first_row_wins_and_description_attaches() {
        let idx = ReasonIndex::parse(FEED, "https://feed.example/ocorrencias");
        let (r, m) = idx.lookup("9", Some("Esmeralda")).expect("line 9");
        assert_eq!(m, ReasonMatch::Exact);
        assert_eq!(r.situation, "Velocidade reduzida");
        assert_eq!(r.timestamp, "15/01/2026 08:10");
        assert!(r.description.starts_with("Falha em equipamento"));
        assert_eq!(r.source, "https://feed.example/ocorrencias");
    }

    #[test]
    fn number_only_fallback_and_short_rows_ignored() {
        let idx = ReasonIndex::parse(FEED, "feed");
        let (r, m) = idx.lookup("11", Some("Coral")).expect("line 11");
        assert_eq!(m, ReasonMatch::NumberOnly);
        assert_eq!(r.situation, "Paralisada");
        assert_eq!(r.description, "");
        assert!(idx.lookup("3", Some("Vermelha")).is_none());
        assert_eq!(idx.rows(), 3);
    }

    #[test]
    fn color_spelling_drift_still_matches_exactly() {
        let idx = ReasonIndex::parse(
            "<table><tr><td>x</td><td>Linha 5 - Lilas</td><td>-</td><td>Paralisada</td></tr></table>",
            "feed",
        );
        assert_eq!(idx.lookup("5", Some("Lilás")).map(|(_, m)| m), Some(ReasonMatch::Exact));
    }

    #[test]
    fn garbage_yields_empty_index() {
        assert!(ReasonIndex::parse("<p>fora do ar</p>", "feed").is_empty());
    }
}
