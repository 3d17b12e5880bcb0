//! Low-resolution views of the position track, so a map can load a whole day cheaply.
//!
//! Sampling is "first record at or after each boundary", not an average: the first
//! record only seeds the boundary, and every emitted record pushes the next boundary
//! to its own timestamp plus the resolution.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};

use crate::error::TelemetryError;
use crate::readings::{parse_timestamp, PositionDocument, POSITION_FIELD};
use crate::store::{Document, DocumentCursor, DocumentStore, FindQuery, ID_FIELD};
use crate::writer::{FlushReport, WriteCache, WriteCacheConfig};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    OneSecond,
    SixSeconds,
    SixtySeconds,
}

impl Resolution {
    pub fn from_secs(secs: u64) -> Result<Self, TelemetryError> {
        match secs {
            1 => Ok(Self::OneSecond),
            6 => Ok(Self::SixSeconds),
            60 => Ok(Self::SixtySeconds),
            other => Err(TelemetryError::UnsupportedResolution(other)),
        }
    }

    pub fn secs(&self) -> u64 {
        match self {
            Self::OneSecond => 1,
            Self::SixSeconds => 6,
            Self::SixtySeconds => 60,
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            Self::OneSecond => "-one-second",
            Self::SixSeconds => "-six-second",
            Self::SixtySeconds => "-sixty-second",
        }
    }

    /// Name of the view built from `source` at this resolution.
    pub fn collection_for(&self, source: &str) -> String {
        format!("{source}{}", self.suffix())
    }

    pub fn duration(&self) -> Duration {
        Duration::seconds(self.secs() as i64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    /// No record seen yet.
    Unanchored,
    /// Waiting for the first record at or after `boundary`.
    Waiting { boundary: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowAction {
    Skip,
    Emit,
}

/// `state × record timestamp → (state, action)`.
pub fn transition(
    state: WindowState,
    ts: DateTime<Utc>,
    resolution: Duration,
) -> (WindowState, WindowAction) {
    match state {
        WindowState::Unanchored => (
            WindowState::Waiting {
                boundary: ts + resolution,
            },
            WindowAction::Skip,
        ),
        WindowState::Waiting { boundary } if ts >= boundary => (
            WindowState::Waiting {
                boundary: ts + resolution,
            },
            WindowAction::Emit,
        ),
        waiting @ WindowState::Waiting { .. } => (waiting, WindowAction::Skip),
    }
}

/// Decimates an ordered stream of timestamps.
#[derive(Debug, Clone)]
pub struct Downsampler {
    state: WindowState,
    resolution: Duration,
}

impl Downsampler {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            state: WindowState::Unanchored,
            resolution: resolution.duration(),
        }
    }

    /// True if the record at `ts` belongs in the output.
    pub fn offer(&mut self, ts: DateTime<Utc>) -> bool {
        let (next, action) = transition(self.state, ts, self.resolution);
        self.state = next;
        action == WindowAction::Emit
    }

    pub fn state(&self) -> WindowState {
        self.state
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LowResSummary {
    pub collection: String,
    pub read: u64,
    pub emitted: u64,
    pub flush: FlushReport,
}

/// Builds `<read_collection><suffix>` from the positions in `read_collection`.
///
/// Refuses to touch an existing destination; drop it first to rebuild.
pub async fn build_low_res_view<S: DocumentStore>(
    store: Arc<S>,
    read_collection: &str,
    resolution: Resolution,
    writes: WriteCacheConfig,
    page_size: usize,
) -> Result<LowResSummary> {
    let destination = resolution.collection_for(read_collection);

    let existing = store
        .collection_names()
        .await
        .context("failed to list collections")?;
    if existing.iter().any(|name| *name == destination) {
        return Err(TelemetryError::DuplicateDestination(destination).into());
    }
    store.create_collection(&destination).await?;

    log_info!(
        "building {}s view {destination} from {read_collection}",
        resolution.secs()
    );

    let mut cache = WriteCache::new(Arc::clone(&store), destination.clone(), writes);
    let mut sampler = Downsampler::new(resolution);
    let mut cursor = DocumentCursor::new(
        store.as_ref(),
        FindQuery::field_exists(read_collection, POSITION_FIELD),
        page_size,
    );

    let mut read = 0;
    let mut emitted = 0;
    while let Some(document) = cursor.next().await? {
        read += 1;
        let ts = document_timestamp(&document)?;
        if sampler.offer(ts) {
            emitted += 1;
            cache.append(strip_store_id(document))?;
        }
    }

    let flush = cache.flush_remaining().await?;
    log_debug!("{destination}: kept {emitted} of {read} positions");

    Ok(LowResSummary {
        collection: destination,
        read,
        emitted,
        flush,
    })
}

fn document_timestamp(document: &Document) -> Result<DateTime<Utc>> {
    if let Ok(position) = serde_json::from_value::<PositionDocument>(document.clone()) {
        return Ok(position.ts);
    }
    let raw = document
        .get("ts")
        .and_then(|ts| ts.as_str())
        .context("position document has no ts")?;
    Ok(parse_timestamp(raw)?)
}

/// The copy gets its own id in the destination collection.
fn strip_store_id(mut document: Document) -> Document {
    if let Some(fields) = document.as_object_mut() {
        fields.remove(ID_FIELD);
    }
    document
}
