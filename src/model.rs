// src/model.rs
//! Values flowing through the pipeline. All of them are plain immutable data:
//! a refresh builds brand-new records instead of mutating previous ones.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lines;

/// Closed severity taxonomy every status phrase is classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    Normal,
    Reduced,
    Closed,
    Halted,
    Unknown,
}

impl StatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Normal => "NORMAL",
            StatusCode::Reduced => "REDUCED",
            StatusCode::Closed => "CLOSED",
            StatusCode::Halted => "HALTED",
            StatusCode::Unknown => "UNKNOWN",
        }
    }

    /// Accepts the name in any case ("REDUCED", "reduced") or the numeric
    /// code older clients use: 0 normal, 1 reduced, 2 closed, 3 halted, 4 unknown.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NORMAL" | "0" => Some(StatusCode::Normal),
            "REDUCED" | "1" => Some(StatusCode::Reduced),
            "CLOSED" | "2" => Some(StatusCode::Closed),
            "HALTED" | "3" => Some(StatusCode::Halted),
            "UNKNOWN" | "4" => Some(StatusCode::Unknown),
            _ => None,
        }
    }
}

/// Provenance of `LineStatus::status_text`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataQuality {
    Live,
    FallbackLastGood,
    Unavailable,
}

impl DataQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataQuality::Live => "LIVE",
            DataQuality::FallbackLastGood => "FALLBACK_LAST_GOOD",
            DataQuality::Unavailable => "UNAVAILABLE",
        }
    }
}

/// How a reason record was matched to a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonMatch {
    /// Composite `<number>-<color>` key.
    Exact,
    /// Bare line number; lower confidence, two lines may share a leading number.
    NumberOnly,
}

/// Unvalidated record recovered by one extraction strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateLine {
    pub number: String,
    pub color: Option<String>,
    pub raw_status: Option<String>,
    pub station_count: Option<u32>,
    pub updated_at: Option<String>,
    pub strategy: &'static str,
}

impl CandidateLine {
    pub fn new(number: impl Into<String>, strategy: &'static str) -> Self {
        Self {
            number: number.into(),
            color: None,
            raw_status: None,
            station_count: None,
            updated_at: None,
            strategy,
        }
    }

    /// Candidate color, else the catalog color for its number.
    pub fn resolved_color(&self) -> Option<String> {
        self.color
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .or_else(|| lines::by_number(&self.number).map(|l| l.color.to_string()))
    }

    /// Dedup key, folded the same way as the line id so "Lilás" and "Lilas"
    /// collapse into one record.
    pub fn key(&self) -> (String, String) {
        (
            self.number.trim().to_string(),
            self.resolved_color()
                .map(|c| lines::color_slug(&c))
                .unwrap_or_default(),
        )
    }

    /// Stable id of the line this candidate describes, e.g. `linha-5-lilas`.
    pub fn line_id(&self) -> String {
        lines::slug(&self.number, self.resolved_color().as_deref())
    }
}

/// One incident row from the reason feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasonRecord {
    pub line_text: String,
    pub description: String,
    pub timestamp: String,
    pub situation: String,
    pub source: String,
}

/// The unit of output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineStatus {
    pub id: String,
    pub number: String,
    pub color: Option<String>,
    pub name: String,
    pub operator: Option<String>,
    pub color_hex: Option<String>,
    pub status_text: String,
    pub status_code: StatusCode,
    pub data_quality: DataQuality,
    pub reason: Option<String>,
    pub reason_timestamp: Option<String>,
    pub reason_source_status: Option<String>,
    pub reason_source: Option<String>,
    pub reason_match: Option<ReasonMatch>,
    pub note: Option<String>,
    pub station_count: Option<u32>,
    pub source_updated_at: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl LineStatus {
    pub fn is_problem(&self) -> bool {
        self.status_code != StatusCode::Normal
    }

    /// Copy without any reason fields; used before (re)attaching a reason.
    pub(crate) fn without_reason(mut self) -> Self {
        self.reason = None;
        self.reason_timestamp = None;
        self.reason_source_status = None;
        self.reason_source = None;
        self.reason_match = None;
        self
    }
}

/// Where a served snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotSource {
    Live,
    Cache,
    CacheFallback,
}
