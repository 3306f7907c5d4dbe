// src/classify.rs
//! Free-text status phrase → severity code.
//!
//! Matching is by keyword containment on a normalized (lowercased,
//! whitespace-collapsed) copy of the phrase, so capitalization and minor
//! wording drift upstream do not change the result.

use crate::model::StatusCode;

/// Literal sentinel used as `status_text` when nothing usable is known.
pub const UNAVAILABLE_TEXT: &str = "indisponível";

const REDUCED_KEYWORDS: &[&str] = &[
    "reduzida",
    "parcial",
    "programada",
    "atenção",
    "maiores intervalos",
];
const HALTED_KEYWORDS: &[&str] = &["paralisad", "interrompid", "suspens"];

/// Sentinels upstream uses for "I have no data for this line".
const UNAVAILABLE_SENTINELS: &[&str] = &[
    "",
    "indisponível",
    "indisponivel",
    "-",
    "--",
    "n/a",
    "n/d",
    "sem informação",
    "sem informacao",
];

/// Lowercase + collapse runs of whitespace (including NBSP) into one space.
pub fn normalize_phrase(text: &str) -> String {
    text.split(|c: char| c.is_whitespace() || c == '\u{00A0}')
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Classify a status phrase. First matching rule wins.
pub fn classify(text: &str) -> StatusCode {
    let t = normalize_phrase(text);

    if t.contains("normal") {
        return StatusCode::Normal;
    }
    if REDUCED_KEYWORDS.iter().any(|k| t.contains(k)) {
        return StatusCode::Reduced;
    }
    if t.contains("encerrad") {
        return StatusCode::Closed;
    }
    if HALTED_KEYWORDS.iter().any(|k| t.contains(k)) {
        return StatusCode::Halted;
    }
    StatusCode::Unknown
}

/// True when the phrase is one of upstream's own "no data" sentinels.
///
/// Distinct from [`StatusCode::Unknown`]: an unknown phrase is still a live
/// observation, a sentinel sends the line down the last-known-good path.
pub fn is_unavailable_text(text: &str) -> bool {
    let t = normalize_phrase(text);
    UNAVAILABLE_SENTINELS.contains(&t.as_str())
}
