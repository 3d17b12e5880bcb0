use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sailtrack_lib::downsample::{build_low_res_view, Resolution};
use sailtrack_lib::ingest::transform_to_store;
use sailtrack_lib::query::{position_series, tack_times, TimeRange};
use sailtrack_lib::readings::parse_timestamp;
use sailtrack_lib::writer::WriteCacheConfig;
use sailtrack_lib::{Database, DocumentStore, TelemetryError};

fn start() -> DateTime<Utc> {
    parse_timestamp("2021-07-09-13:40:00.000").unwrap()
}

fn logger_time(offset_ms: i64) -> String {
    (start() + Duration::milliseconds(offset_ms))
        .format("%Y-%m-%d-%H:%M:%S%.3f")
        .to_string()
}

/// Twenty seconds of positions at 2 Hz, plus a tack's worth of wind at 5 Hz.
fn race_log() -> String {
    let mut lines = Vec::new();
    for n in 0..=40 {
        let ms = n * 500;
        lines.push(format!(
            r#"{{"description":"Position, Rapid Update","timestamp":"{}","fields":{{"Latitude":{},"Longitude":-1.29}}}}"#,
            logger_time(ms),
            50.76 + n as f64 * 1e-5
        ));
    }
    for n in 0..10 {
        let awa = if n < 5 { 10.0 } else { 340.0 };
        lines.push(format!(
            r#"{{"description":"Wind Data","timestamp":"{}","fields":{{"Wind Angle":{awa},"Wind Speed":6.2,"Reference":{{"name":"Apparent","value":2}}}}}}"#,
            logger_time(100 + n * 200)
        ));
    }
    lines.push("garbage".to_string());
    lines.join("\n")
}

fn small_batches() -> WriteCacheConfig {
    WriteCacheConfig {
        threshold: 8,
        ..WriteCacheConfig::default()
    }
}

#[tokio::test]
async fn log_to_map_and_tacks() {
    let store = Arc::new(Database::open_in_memory().unwrap());

    let summary = transform_to_store(
        Arc::clone(&store),
        race_log().as_bytes(),
        "210709",
        small_batches(),
    )
    .await
    .unwrap();
    assert_eq!(summary.written, 51);
    assert_eq!(summary.skipped, 1);
    let flush = summary.flush.unwrap();
    assert_eq!(flush.flushed, 51);
    assert_eq!(flush.batches, 7);

    let view = build_low_res_view(
        Arc::clone(&store),
        "210709",
        Resolution::SixSeconds,
        small_batches(),
        16,
    )
    .await
    .unwrap();
    assert_eq!(view.read, 41);
    assert_eq!(view.emitted, 3);

    let track = position_series(store.as_ref(), "210709", 16).await.unwrap();
    let times: Vec<DateTime<Utc>> = track.iter().map(|p| p.ts).collect();
    assert_eq!(
        times,
        vec![
            start() + Duration::seconds(6),
            start() + Duration::seconds(12),
            start() + Duration::seconds(18),
        ]
    );

    let range = TimeRange::new(start(), start() + Duration::seconds(30)).unwrap();
    let tacks = tack_times(store.as_ref(), "210709", range, 4).await.unwrap();
    assert_eq!(tacks, vec![start() + Duration::milliseconds(1100)]);

    let mut names = store.collection_names().await.unwrap();
    names.sort();
    assert_eq!(names, vec!["210709", "210709-six-second"]);
}

#[tokio::test]
async fn rebuilding_a_view_is_refused() {
    let store = Arc::new(Database::open_in_memory().unwrap());
    transform_to_store(
        Arc::clone(&store),
        race_log().as_bytes(),
        "210709",
        WriteCacheConfig::default(),
    )
    .await
    .unwrap();

    for attempt in 0..2 {
        let result = build_low_res_view(
            Arc::clone(&store),
            "210709",
            Resolution::OneSecond,
            WriteCacheConfig::default(),
            100,
        )
        .await;
        if attempt == 0 {
            assert_eq!(result.unwrap().emitted, 20);
        } else {
            let err = result.unwrap_err();
            assert!(matches!(
                err.downcast_ref::<TelemetryError>(),
                Some(TelemetryError::DuplicateDestination(name)) if name == "210709-one-second"
            ));
        }
    }
}
