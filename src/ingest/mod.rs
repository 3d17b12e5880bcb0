//! Whole-file conversions of logger output: into the store, into a JSON-lines file,
//! or into a SailNjord CSV.
//!
//! A timestamp that will not parse ends a file export, since a gap in an export is
//! silent. The store paths log it and move on.

use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Duration;

use crate::error::TelemetryError;
use crate::fusion::{CsvExporter, FusionEngine, FusionStats};
use crate::readings::{classify_line, Classified, TypedReading};
use crate::store::DocumentStore;
use crate::writer::{FlushReport, WriteCache, WriteCacheConfig};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub lines: u64,
    /// Documents or rows produced.
    pub written: u64,
    /// Lines that were not a usable reading.
    pub skipped: u64,
    /// Lines dropped for an unparseable timestamp (store paths only).
    pub bad_timestamps: u64,
    pub flush: Option<FlushReport>,
}

/// `<input>sn.csv`, next to the input.
pub fn csv_output_path(input: &Path) -> PathBuf {
    with_suffix(input, "sn.csv")
}

/// `<input>.mong`, next to the input.
pub fn documents_output_path(input: &Path) -> PathBuf {
    with_suffix(input, ".mong")
}

fn with_suffix(input: &Path, suffix: &str) -> PathBuf {
    let mut name = input.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Drives `handle` with every typed reading in `input`.
///
/// `lenient` decides whether a recoverable line error, such as a bad timestamp, is
/// counted and skipped or returned.
fn for_each_reading<R, F>(
    input: R,
    lenient: bool,
    summary: &mut IngestSummary,
    mut handle: F,
) -> Result<()>
where
    R: BufRead,
    F: FnMut(TypedReading) -> Result<()>,
{
    for (number, line) in input.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read input line {}", number + 1))?;
        summary.lines += 1;

        match classify_line(&line) {
            Ok(Classified::Reading(reading)) => handle(reading)?,
            Ok(Classified::Skip(reason)) => {
                log_debug!("line {}: skipped ({reason:?})", number + 1);
                summary.skipped += 1;
            }
            Err(err) if lenient && err.is_recoverable() => {
                log_warn!("line {}: {err}", number + 1);
                summary.bad_timestamps += 1;
            }
            Err(err) => {
                return Err(err).with_context(|| format!("line {} of the input", number + 1));
            }
        }
    }
    Ok(())
}

async fn claim_collection<S: DocumentStore>(store: &S, collection: &str) -> Result<()> {
    store
        .create_collection(collection)
        .await
        .with_context(|| format!("cannot write to collection {collection}"))
}

/// Stores every reading as its per-type document in `collection`.
pub async fn transform_to_store<S, R>(
    store: Arc<S>,
    input: R,
    collection: &str,
    writes: WriteCacheConfig,
) -> Result<IngestSummary>
where
    S: DocumentStore,
    R: BufRead,
{
    claim_collection(store.as_ref(), collection).await?;
    let mut cache = WriteCache::new(Arc::clone(&store), collection, writes);
    let mut summary = IngestSummary::default();

    let mut written = 0;
    for_each_reading(input, true, &mut summary, |reading| {
        cache.append(reading.to_document()?)?;
        written += 1;
        Ok(())
    })?;
    summary.written = written;
    summary.flush = Some(cache.flush_remaining().await?);

    log_info!(
        "transformed {} lines into {collection}: {} documents, {} skipped",
        summary.lines,
        summary.written,
        summary.skipped
    );
    Ok(summary)
}

/// Stores one fused row per position window in `collection`.
pub async fn fuse_to_store<S, R>(
    store: Arc<S>,
    input: R,
    collection: &str,
    writes: WriteCacheConfig,
    min_interval: Duration,
) -> Result<IngestSummary>
where
    S: DocumentStore,
    R: BufRead,
{
    claim_collection(store.as_ref(), collection).await?;
    let mut cache = WriteCache::new(Arc::clone(&store), collection, writes);
    let mut engine = FusionEngine::new(min_interval);
    let mut summary = IngestSummary::default();

    let mut written = 0;
    for_each_reading(input, true, &mut summary, |reading| {
        if let Some(row) = engine.handle(&reading)? {
            cache.append(row.to_document()?)?;
            written += 1;
        }
        Ok(())
    })?;
    summary.written = written;
    log_fusion(&engine.finish());
    summary.flush = Some(cache.flush_remaining().await?);
    Ok(summary)
}

/// Writes every reading's per-type document to `out`, one JSON object per line.
pub fn export_documents<R: BufRead, W: Write>(input: R, mut out: W) -> Result<IngestSummary> {
    let mut summary = IngestSummary::default();
    let mut written = 0;
    for_each_reading(input, false, &mut summary, |reading| {
        let document = reading.to_document()?;
        serde_json::to_writer(&mut out, &document).context("failed to write document")?;
        out.write_all(b"\n").context("failed to write document")?;
        written += 1;
        Ok(())
    })?;
    out.flush().context("failed to flush document export")?;
    summary.written = written;
    Ok(summary)
}

/// Writes the fused rows as SailNjord CSV.
pub fn export_csv<R: BufRead, W: Write>(
    input: R,
    out: W,
    min_interval: Duration,
) -> Result<IngestSummary> {
    let mut exporter = CsvExporter::new(out)?;
    let mut engine = FusionEngine::new(min_interval);
    let mut summary = IngestSummary::default();

    for_each_reading(input, false, &mut summary, |reading| {
        if let Some(row) = engine.handle(&reading)? {
            exporter.write_row(&row)?;
        }
        Ok(())
    })?;
    summary.written = exporter.rows();
    exporter.finish()?;
    log_fusion(&engine.finish());
    Ok(summary)
}

fn log_fusion(stats: &FusionStats) {
    log_debug!(
        "fusion: {} readings, {} before first fix, {} rows",
        stats.readings,
        stats.discarded_while_syncing,
        stats.rows
    );
}

/// How often each description occurs in a log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescriptionCensus {
    pub lines: u64,
    pub malformed: u64,
    pub counts: BTreeMap<String, u64>,
}

#[derive(serde::Deserialize)]
struct DescriptionOnly {
    description: Option<String>,
}

/// Counts records per description. Malformed lines are counted, not fatal.
pub fn count_descriptions<R: BufRead>(input: R) -> Result<DescriptionCensus> {
    let mut census = DescriptionCensus::default();
    for (number, line) in input.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read input line {}", number + 1))?;
        census.lines += 1;
        match serde_json::from_str::<DescriptionOnly>(&line) {
            Ok(DescriptionOnly {
                description: Some(description),
            }) => *census.counts.entry(description).or_default() += 1,
            Ok(_) => {}
            Err(err) => {
                log_debug!("line {}: {err}", number + 1);
                census.malformed += 1;
            }
        }
    }
    Ok(census)
}

/// True if `err` is a bad timestamp, which file exports treat as fatal.
pub fn is_timestamp_failure(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<TelemetryError>(),
        Some(TelemetryError::Parse { .. })
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::MemoryStore;
    use crate::store::Document;

    const LOG: &str = r#"{"description":"Speed","timestamp":"2021-07-09-13:40:00.100","fields":{"Speed Water Referenced":3.0}}
{"description":"Position, Rapid Update","timestamp":"2021-07-09-13:40:00.200","fields":{"Latitude":50.76,"Longitude":-1.29}}
not json
{"description":"Wind Data","timestamp":"2021-07-09-13:40:00.300","fields":{"Wind Speed":6.0,"Wind Angle":30.0,"Reference":{"name":"Apparent"}}}
{"description":"ISO Address Claim","timestamp":"2021-07-09-13:40:00.350","fields":{}}
{"description":"Speed","timestamp":"2021-07-09-13:40:00.400","fields":{"Speed Water Referenced":3.5}}
{"description":"Position, Rapid Update","timestamp":"2021-07-09-13:40:01.200","fields":{"Latitude":50.77,"Longitude":-1.28}}
"#;

    const BAD_TIME: &str = r#"{"description":"Speed","timestamp":"yesterday","fields":{"Speed Water Referenced":3.0}}"#;

    fn second() -> Duration {
        Duration::seconds(1)
    }

    #[tokio::test]
    async fn transform_stores_each_reading() {
        let store = Arc::new(MemoryStore::default());
        let summary = transform_to_store(
            Arc::clone(&store),
            LOG.as_bytes(),
            "210709",
            WriteCacheConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(summary.lines, 7);
        assert_eq!(summary.written, 5);
        assert_eq!(summary.skipped, 2);
        let docs: Vec<Document> = store.documents("210709");
        assert_eq!(docs.len(), 5);
        assert_eq!(docs[0]["indicatedBoatSpeed"], 3.0);
        assert_eq!(docs[2]["apparentWindAngle"], 30.0);
    }

    #[tokio::test]
    async fn transform_skips_bad_timestamps() {
        let store = Arc::new(MemoryStore::default());
        let input = format!("{BAD_TIME}\n{LOG}");
        let summary = transform_to_store(
            Arc::clone(&store),
            input.as_bytes(),
            "210709",
            WriteCacheConfig::default(),
        )
        .await
        .unwrap();
        assert_eq!(summary.bad_timestamps, 1);
        assert_eq!(summary.written, 5);
    }

    #[tokio::test]
    async fn transform_refuses_existing_collection() {
        let store = Arc::new(MemoryStore::default());
        store.create_collection("210709").await.unwrap();
        let err = transform_to_store(
            Arc::clone(&store),
            LOG.as_bytes(),
            "210709",
            WriteCacheConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TelemetryError>(),
            Some(TelemetryError::DuplicateDestination(_))
        ));
        assert!(store.documents("210709").is_empty());
    }

    #[tokio::test]
    async fn fuse_stores_one_row_per_window() {
        let store = Arc::new(MemoryStore::default());
        let summary = fuse_to_store(
            Arc::clone(&store),
            LOG.as_bytes(),
            "210709-fused",
            WriteCacheConfig::default(),
            second(),
        )
        .await
        .unwrap();
        assert_eq!(summary.written, 1);
        let docs = store.documents("210709-fused");
        assert_eq!(docs[0]["ts"], "2021-07-09T13:40:01.200Z");
        assert_eq!(docs[0]["lat"], 50.77);
        assert!(docs[0].get("tws").is_some());
    }

    #[test]
    fn csv_export_writes_header_and_rows() {
        let mut out = Vec::new();
        let summary = export_csv(LOG.as_bytes(), &mut out, second()).unwrap();
        assert_eq!(summary.written, 1);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("2021-07-09T13:40:01.200Z,50.770000,-1.280000,6.804000,,30.000000,"));
    }

    #[test]
    fn csv_export_stops_on_bad_timestamp() {
        let input = format!("{LOG}{BAD_TIME}\n");
        let err = export_csv(input.as_bytes(), Vec::new(), second()).unwrap_err();
        assert!(is_timestamp_failure(&err));
    }

    #[test]
    fn document_export_is_json_lines() {
        let mut out = Vec::new();
        let summary = export_documents(LOG.as_bytes(), &mut out).unwrap();
        assert_eq!(summary.written, 5);
        let text = String::from_utf8(out).unwrap();
        for line in text.lines() {
            let doc: Document = serde_json::from_str(line).unwrap();
            assert!(doc["ts"].as_str().unwrap().ends_with('Z'));
        }
    }

    #[test]
    fn document_export_stops_on_bad_timestamp() {
        let err = export_documents(BAD_TIME.as_bytes(), Vec::new()).unwrap_err();
        assert!(is_timestamp_failure(&err));
    }

    #[test]
    fn census_counts_descriptions() {
        let census = count_descriptions(LOG.as_bytes()).unwrap();
        assert_eq!(census.lines, 7);
        assert_eq!(census.malformed, 1);
        assert_eq!(census.counts["Speed"], 2);
        assert_eq!(census.counts["Position, Rapid Update"], 2);
        assert_eq!(census.counts["ISO Address Claim"], 1);
    }

    #[test]
    fn output_paths_append_suffixes() {
        assert_eq!(
            csv_output_path(Path::new("logs/210709.log")),
            PathBuf::from("logs/210709.logsn.csv")
        );
        assert_eq!(
            documents_output_path(Path::new("210709.log")),
            PathBuf::from("210709.log.mong")
        );
    }
}
