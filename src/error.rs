use thiserror::Error;

use crate::pipeline::RunSummary;

/// A page could not be obtained.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
}

impl FetchError {
    /// Rate limiting and server-side errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Transport { source, .. } => source.is_timeout() || source.is_connect(),
        }
    }
}

/// `page_count` pages of `page_size` entries reach past the largest offset.
#[derive(Debug, Error, PartialEq)]
#[error("{page_count} pages of {page_size} entries overflow the offset range")]
pub struct RangeError {
    pub page_count: u32,
    pub page_size: u32,
}

/// One field of one listing entry could not be read. Always recovered locally.
#[derive(Debug, Error, PartialEq)]
pub enum ExtractionError {
    #[error("entry {index}: missing {field}")]
    MissingField { index: usize, field: &'static str },
    #[error("entry {index}: unparsable rating {raw:?}")]
    InvalidRating { index: usize, raw: String },
}

#[derive(Debug, Error)]
pub enum FlushError {
    #[error("store write failed: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("store rejected batch of {records}: {reason}")]
    Rejected { records: usize, reason: String },
    #[error("sink is closed")]
    Closed,
}

/// Fatal outcome of a crawl. The pipeline has still drained and closed.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("aborting crawl at offset {offset}: {source}")]
    Fetch {
        offset: u32,
        #[source]
        source: FetchError,
        summary: RunSummary,
    },
    #[error("flush failed after {attempts} attempts: {source}")]
    Flush {
        attempts: u32,
        #[source]
        source: FlushError,
        summary: RunSummary,
    },
}

impl PipelineError {
    pub fn summary(&self) -> &RunSummary {
        match self {
            PipelineError::Fetch { summary, .. } | PipelineError::Flush { summary, .. } => summary,
        }
    }
}
