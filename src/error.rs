//! Domain error kinds shared by the ingest, fusion and persistence paths.
//!
//! Plumbing code returns `anyhow::Result`; these variants travel inside it and are
//! recovered with `downcast_ref` where a caller needs to tell them apart.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Timestamp could not be parsed, even after normalisation.
    #[error("failed to parse timestamp '{raw}': {source}")]
    Parse {
        raw: String,
        #[source]
        source: chrono::ParseError,
    },

    /// Reading arrived in a reference frame other than the one the field requires.
    #[error("{kind} reference is '{found}', expected '{expected}'")]
    ReferenceMismatch {
        kind: &'static str,
        expected: &'static str,
        found: String,
    },

    #[error("mandatory field {0} missing at emission")]
    MissingMandatoryField(&'static str),

    #[error("bulk insert of {documents} documents into '{collection}' failed: {message}")]
    Persistence {
        collection: String,
        documents: usize,
        message: String,
    },

    #[error("bulk insert of {documents} documents into '{collection}' timed out after {timeout:?}")]
    FlushTimeout {
        collection: String,
        documents: usize,
        timeout: Duration,
    },

    #[error("collection '{0}' exists already")]
    DuplicateDestination(String),

    #[error("resolution of {0} seconds is not supported")]
    UnsupportedResolution(u64),

    #[error("stop time {stop} is before start time {start}")]
    InvalidTimeRange { start: String, stop: String },
}

impl TelemetryError {
    /// Whether the stream should carry on after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Parse { .. } | Self::ReferenceMismatch { .. })
    }
}
