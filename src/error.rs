// src/error.rs
//! Cycle-level failures of the status pipeline.
//!
//! Only two things can fail a refresh cycle: the transport (after retries) and
//! a document from which no extraction strategy recovered a single line.
//! Everything finer grained (one malformed line, an unknown status phrase, the
//! source reporting "indisponível") is handled inside the cycle.

use thiserror::Error;

/// Transport failure after the fetcher exhausted its retries.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("fetch {url} failed after {attempts} attempt(s): {cause}")]
pub struct FetchError {
    pub url: String,
    pub attempts: u32,
    pub cause: String,
}

impl FetchError {
    pub fn new(url: impl Into<String>, attempts: u32, cause: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            attempts,
            cause: cause.into(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("no line data extracted from {url}")]
    NoDataExtracted { url: String },

    #[error("no status source configured")]
    NoSources,
}

impl PipelineError {
    /// Short machine-friendly tag, used for metric labels and the cycle report.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Fetch(_) => "fetch",
            PipelineError::NoDataExtracted { .. } => "no_data",
            PipelineError::NoSources => "no_sources",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
