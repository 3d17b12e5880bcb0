//! Read side used by the map and analysis views.

use std::io::BufRead;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::downsample::Resolution;
use crate::error::TelemetryError;
use crate::readings::{
    classify_line, parse_timestamp, Classified, Measurement, PositionDocument, WindDocument,
    POSITION_FIELD, WIND_ANGLE_FIELD,
};
use crate::store::{DocumentCursor, DocumentStore, FindQuery};
use crate::tack::TackDetector;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// Positions for the map view come from the six-second view.
pub const POSITION_SERIES_RESOLUTION: Resolution = Resolution::SixSeconds;

/// Inclusive time window; `stop` is never before `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    start: DateTime<Utc>,
    stop: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, stop: DateTime<Utc>) -> Result<Self, TelemetryError> {
        if stop < start {
            return Err(TelemetryError::InvalidTimeRange {
                start: start.to_rfc3339(),
                stop: stop.to_rfc3339(),
            });
        }
        Ok(Self { start, stop })
    }

    /// Parses both ends as RFC 3339 or logger timestamps.
    pub fn parse(start: &str, stop: &str) -> Result<Self, TelemetryError> {
        Self::new(parse_timestamp(start)?, parse_timestamp(stop)?)
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts <= self.stop
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn stop(&self) -> DateTime<Utc> {
        self.stop
    }
}

/// The whole low-resolution track recorded on `day` (the transform's collection name).
pub async fn position_series<S: DocumentStore + ?Sized>(
    store: &S,
    day: &str,
    page_size: usize,
) -> Result<Vec<PositionDocument>> {
    let collection = POSITION_SERIES_RESOLUTION.collection_for(day);
    let mut cursor = DocumentCursor::new(
        store,
        FindQuery::field_exists(&collection, POSITION_FIELD),
        page_size,
    );

    let mut positions = Vec::new();
    while let Some(document) = cursor.next().await? {
        let position: PositionDocument = serde_json::from_value(document)
            .with_context(|| format!("malformed position in {collection}"))?;
        positions.push(position);
    }
    log_debug!("{} positions from {collection}", positions.len());
    Ok(positions)
}

/// Tack times in `range`, from the wind documents stored in `table`.
pub async fn tack_times<S: DocumentStore + ?Sized>(
    store: &S,
    table: &str,
    range: TimeRange,
    page_size: usize,
) -> Result<Vec<DateTime<Utc>>> {
    let mut cursor = DocumentCursor::new(
        store,
        FindQuery::field_exists(table, WIND_ANGLE_FIELD),
        page_size,
    );

    let mut detector = TackDetector::new();
    let mut tacks = Vec::new();
    while let Some(document) = cursor.next().await? {
        let wind: WindDocument = serde_json::from_value(document)
            .with_context(|| format!("malformed wind document in {table}"))?;
        if wind.ts > range.stop() {
            break;
        }
        let Some(awa) = wind.apparent_wind_angle else {
            continue;
        };
        if range.contains(wind.ts) {
            tacks.extend(detector.push(awa, wind.ts));
        }
    }

    log_info!(
        "{} tacks in {table} between {} and {}",
        tacks.len(),
        range.start(),
        range.stop()
    );
    Ok(tacks)
}

/// Same as [`tack_times`] but straight from a logger file.
pub fn tack_times_from_lines<R: BufRead>(
    input: R,
    range: TimeRange,
) -> Result<Vec<DateTime<Utc>>> {
    let mut detector = TackDetector::new();
    let mut tacks = Vec::new();

    for line in input.lines() {
        let line = line.context("failed to read logger line")?;
        let reading = match classify_line(&line) {
            Ok(Classified::Reading(reading)) => reading,
            Ok(Classified::Skip(_)) => continue,
            Err(err) => {
                log_debug!("skipping line: {err}");
                continue;
            }
        };
        let Measurement::Wind(wind) = &reading.measurement else {
            continue;
        };
        let Ok((awa, _)) = wind.apparent() else {
            continue;
        };
        if range.contains(reading.timestamp) {
            tacks.extend(detector.push(awa, reading.timestamp));
        }
    }
    Ok(tacks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readings::format_timestamp;
    use crate::store::testing::MemoryStore;
    use crate::store::Document;
    use chrono::Duration;
    use serde_json::json;

    fn at(n: i64) -> DateTime<Utc> {
        parse_timestamp("2021-07-09T13:40:00Z").unwrap() + Duration::milliseconds(200 * n)
    }

    fn wind_doc(n: i64, awa: f64) -> Document {
        json!({
            "ts": format_timestamp(&at(n)),
            "metadata": { "source": "anemometer", "reference": "Apparent" },
            "apparentWindAngle": awa,
            "apparentWindSpeed": 6.0,
        })
    }

    #[test]
    fn stop_before_start_is_rejected() {
        let err = TimeRange::parse("2021-07-09T14:00:00Z", "2021-07-09T13:00:00Z").unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidTimeRange { .. }));
        assert!(TimeRange::parse("2021-07-09T13:00:00Z", "2021-07-09T13:00:00Z").is_ok());
    }

    #[tokio::test]
    async fn tacks_from_stored_wind() {
        let store = MemoryStore::default();
        let docs: Vec<Document> = (0..10)
            .map(|n| wind_doc(n, if n < 5 { 10.0 } else { 340.0 }))
            .collect();
        store.insert_many("210709", &docs).await.unwrap();

        let range = TimeRange::new(at(0), at(20)).unwrap();
        let tacks = tack_times(&store, "210709", range, 4).await.unwrap();
        assert_eq!(tacks, vec![at(5)]);

        let before = TimeRange::new(at(0), at(3)).unwrap();
        assert!(tack_times(&store, "210709", before, 4).await.unwrap().is_empty());
    }

    #[test]
    fn tacks_from_logger_lines() {
        let lines: String = (0..10)
            .map(|n| {
                let awa = if n < 5 { 10.0 } else { 340.0 };
                let ts = at(n).format("%Y-%m-%d-%H:%M:%S%.3f");
                format!(
                    "{{\"description\":\"Wind Data\",\"timestamp\":\"{ts}\",\"fields\":{{\"Wind Angle\":{awa},\"Wind Speed\":5.0,\"Reference\":{{\"name\":\"Apparent\"}}}}}}\n"
                )
            })
            .collect();
        let range = TimeRange::new(at(0), at(10)).unwrap();
        assert_eq!(tack_times_from_lines(lines.as_bytes(), range).unwrap(), vec![at(5)]);
    }

    #[tokio::test]
    async fn position_series_reads_six_second_view() {
        let store = MemoryStore::default();
        store
            .insert_many(
                "210709-six-second",
                &[json!({
                    "ts": "2021-07-09T13:40:06.000Z",
                    "metadata": { "source": "gps" },
                    "lat": 50.7,
                    "long": -1.3,
                })],
            )
            .await
            .unwrap();

        let positions = position_series(&store, "210709", 100).await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].lat, 50.7);
        assert!(position_series(&store, "210710", 100).await.unwrap().is_empty());
    }
}
