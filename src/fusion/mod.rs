//! Merges the independently arriving sensor readings into one row per position window.
//!
//! Position fixes drive the clock: nothing is kept until the first fix, and a row is
//! written on the first fix at least `min_interval` after the previous row. Everything
//! else overwrites its fields in a [`CompositeRecord`] that is never cleared, so a
//! quiet sensor keeps contributing its last value.

pub mod export;
pub mod record;
pub mod true_wind;

use chrono::{DateTime, Duration, Utc};

use crate::error::TelemetryError;
use crate::readings::{Measurement, TypedReading};

pub use export::CsvExporter;
pub use record::{Column, CompositeRecord, FusedRow, COLUMNS};
pub use true_wind::{true_wind, TrueWind, MS_TO_KNOTS};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionState {
    /// Waiting for the first position fix.
    Syncing,
    Accumulating { anchor: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionEvent {
    Position { at: DateTime<Utc> },
    Sensor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionAction {
    /// Reading arrived before any position; drop it.
    Discard,
    /// First fix: store it and start the first window.
    Anchor,
    /// Store the sensor values.
    Absorb,
    /// Store the fix; the window is still open.
    AbsorbPosition,
    /// Store the fix and write a row.
    Emit,
}

/// `state × event → (state, action)`.
pub fn transition(
    state: FusionState,
    event: FusionEvent,
    min_interval: Duration,
) -> (FusionState, FusionAction) {
    match (state, event) {
        (FusionState::Syncing, FusionEvent::Sensor) => (state, FusionAction::Discard),
        (FusionState::Syncing, FusionEvent::Position { at }) => {
            (FusionState::Accumulating { anchor: at }, FusionAction::Anchor)
        }
        (FusionState::Accumulating { .. }, FusionEvent::Sensor) => (state, FusionAction::Absorb),
        (FusionState::Accumulating { anchor }, FusionEvent::Position { at }) => {
            if at - anchor >= min_interval {
                (FusionState::Accumulating { anchor: at }, FusionAction::Emit)
            } else {
                (state, FusionAction::AbsorbPosition)
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FusionStats {
    pub readings: u64,
    pub discarded_while_syncing: u64,
    pub reference_mismatches: u64,
    pub rows: u64,
}

pub struct FusionEngine {
    state: FusionState,
    record: CompositeRecord,
    min_interval: Duration,
    stats: FusionStats,
}

impl FusionEngine {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            state: FusionState::Syncing,
            record: CompositeRecord::default(),
            min_interval,
            stats: FusionStats::default(),
        }
    }

    pub fn state(&self) -> FusionState {
        self.state
    }

    pub fn record(&self) -> &CompositeRecord {
        &self.record
    }

    pub fn stats(&self) -> &FusionStats {
        &self.stats
    }

    /// Feeds one reading, returning a row when it closes a window.
    ///
    /// Errors only when a row is due and the record lacks a mandatory column.
    pub fn handle(&mut self, reading: &TypedReading) -> Result<Option<FusedRow>, TelemetryError> {
        self.stats.readings += 1;

        let event = match reading.measurement {
            Measurement::Position { .. } => FusionEvent::Position {
                at: reading.timestamp,
            },
            _ => FusionEvent::Sensor,
        };
        let (next, action) = transition(self.state, event, self.min_interval);
        self.state = next;

        match action {
            FusionAction::Discard => {
                self.stats.discarded_while_syncing += 1;
                Ok(None)
            }
            FusionAction::Absorb => match self.absorb(&reading.measurement) {
                Ok(()) => Ok(None),
                Err(err) if err.is_recoverable() => {
                    self.stats.reference_mismatches += 1;
                    log_debug!("skipping reading at {}: {err}", reading.timestamp);
                    Ok(None)
                }
                Err(err) => Err(err),
            },
            FusionAction::Anchor | FusionAction::AbsorbPosition => {
                self.absorb_position(reading);
                Ok(None)
            }
            FusionAction::Emit => {
                self.absorb_position(reading);
                let row = self.record.snapshot()?;
                self.stats.rows += 1;
                Ok(Some(row))
            }
        }
    }

    fn absorb_position(&mut self, reading: &TypedReading) {
        if let Measurement::Position { lat, long } = reading.measurement {
            self.record.timestamp = Some(reading.timestamp);
            self.record.lat = Some(lat);
            self.record.lon = Some(long);
        }
    }

    /// Reference checks run before any field is touched, so a rejected reading leaves
    /// the record exactly as it was.
    fn absorb(&mut self, measurement: &Measurement) -> Result<(), TelemetryError> {
        let record = &mut self.record;
        match measurement {
            Measurement::Position { .. } => {}
            Measurement::Speed { indicated } => {
                record.boat_speed = Some(indicated * MS_TO_KNOTS);
            }
            Measurement::Heading { magnetic, .. } => {
                record.heading = Some(*magnetic);
            }
            Measurement::Wind(wind) => {
                let (angle, speed) = wind.apparent()?;
                let aws = speed * MS_TO_KNOTS;
                let derived = true_wind(record.boat_speed, aws, angle);
                record.awa = Some(angle);
                record.aws = Some(aws);
                record.tws = Some(derived.speed);
                record.twa = Some(derived.angle);
            }
            Measurement::Attitude { pitch, roll } => {
                record.pitch = Some(*pitch);
                record.heel = Some(*roll);
            }
            Measurement::CourseOverGround(course) => {
                let cog = course.true_course()?;
                record.cog = Some(cog);
                record.sog = Some(course.sog * MS_TO_KNOTS);
            }
        }
        Ok(())
    }

    /// Logs what the run dropped. Call once the input is exhausted.
    pub fn finish(self) -> FusionStats {
        if self.state == FusionState::Syncing && self.stats.readings > 0 {
            log_warn!(
                "no position fix in {} readings, nothing written",
                self.stats.readings
            );
        }
        if self.stats.reference_mismatches > 0 {
            log_warn!(
                "{} wind/COG readings skipped for an unexpected reference",
                self.stats.reference_mismatches
            );
        }
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readings::{parse_timestamp, CourseOverGroundData, DataSource, WindData};

    fn at(offset_ms: i64) -> DateTime<Utc> {
        parse_timestamp("2021-07-09-13:40:00.000").unwrap() + Duration::milliseconds(offset_ms)
    }

    fn reading(offset_ms: i64, measurement: Measurement) -> TypedReading {
        TypedReading {
            timestamp: at(offset_ms),
            source: measurement.class().source(),
            measurement,
        }
    }

    fn fix(offset_ms: i64) -> TypedReading {
        reading(
            offset_ms,
            Measurement::Position {
                lat: 50.0 + offset_ms as f64 / 1e6,
                long: -1.0,
            },
        )
    }

    fn wind(offset_ms: i64, angle: f64, speed: f64, reference: &str) -> TypedReading {
        reading(
            offset_ms,
            Measurement::Wind(WindData {
                angle,
                speed,
                reference: reference.to_string(),
            }),
        )
    }

    fn engine() -> FusionEngine {
        FusionEngine::new(Duration::seconds(1))
    }

    #[test]
    fn transition_table() {
        let second = Duration::seconds(1);
        let anchored = FusionState::Accumulating { anchor: at(0) };
        assert_eq!(
            transition(FusionState::Syncing, FusionEvent::Sensor, second),
            (FusionState::Syncing, FusionAction::Discard)
        );
        assert_eq!(
            transition(FusionState::Syncing, FusionEvent::Position { at: at(0) }, second),
            (anchored, FusionAction::Anchor)
        );
        assert_eq!(
            transition(anchored, FusionEvent::Sensor, second),
            (anchored, FusionAction::Absorb)
        );
        assert_eq!(
            transition(anchored, FusionEvent::Position { at: at(999) }, second),
            (anchored, FusionAction::AbsorbPosition)
        );
        assert_eq!(
            transition(anchored, FusionEvent::Position { at: at(1000) }, second),
            (
                FusionState::Accumulating { anchor: at(1000) },
                FusionAction::Emit
            )
        );
    }

    #[test]
    fn sensors_before_first_fix_are_ignored() {
        let mut engine = engine();
        let speed = reading(0, Measurement::Speed { indicated: 3.0 });
        assert_eq!(engine.handle(&speed).unwrap(), None);
        assert_eq!(engine.record().boat_speed, None);
        assert_eq!(engine.stats().discarded_while_syncing, 1);

        engine.handle(&fix(100)).unwrap();
        assert_eq!(engine.state(), FusionState::Accumulating { anchor: at(100) });
    }

    #[test]
    fn one_row_per_window_with_carried_values() {
        let mut engine = engine();
        let mut rows = Vec::new();
        let stream = vec![
            fix(0),
            reading(100, Measurement::Speed { indicated: 2.0 }),
            reading(200, Measurement::Speed { indicated: 3.0 }),
            fix(500),
            reading(
                600,
                Measurement::Heading {
                    magnetic: 270.0,
                    variation: None,
                },
            ),
            fix(1000),
            fix(1500),
            fix(2100),
        ];
        for reading in &stream {
            if let Some(row) = engine.handle(reading).unwrap() {
                rows.push(row);
            }
        }

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp, at(1000));
        assert_eq!(rows[0].boat_speed, Some(3.0 * MS_TO_KNOTS));
        assert_eq!(rows[0].heading, Some(270.0));
        assert_eq!(rows[1].timestamp, at(2100));
        assert_eq!(rows[1].boat_speed, Some(3.0 * MS_TO_KNOTS));
        assert_eq!(engine.stats().rows, 2);
    }

    #[test]
    fn mismatched_wind_reference_leaves_record_untouched() {
        let mut engine = engine();
        engine.handle(&fix(0)).unwrap();
        engine.handle(&wind(100, 40.0, 5.0, "Apparent")).unwrap();
        let before = engine.record().clone();

        engine.handle(&wind(200, 90.0, 9.0, "True (boat referenced)")).unwrap();

        assert_eq!(engine.record(), &before);
        assert_eq!(engine.record().awa, Some(40.0));
        assert_eq!(engine.record().aws, Some(5.0 * MS_TO_KNOTS));
        assert_eq!(engine.stats().reference_mismatches, 1);
    }

    #[test]
    fn magnetic_course_is_skipped_whole() {
        let mut engine = engine();
        engine.handle(&fix(0)).unwrap();
        let cog = reading(
            100,
            Measurement::CourseOverGround(CourseOverGroundData {
                cog: 180.0,
                sog: 2.0,
                reference: "Magnetic".to_string(),
            }),
        );
        engine.handle(&cog).unwrap();
        assert_eq!(engine.record().cog, None);
        assert_eq!(engine.record().sog, None);
    }

    #[test]
    fn true_wind_tracks_boat_speed() {
        let mut engine = engine();
        engine.handle(&fix(0)).unwrap();

        engine.handle(&wind(100, 45.0, 10.0, "Apparent")).unwrap();
        assert_eq!(engine.record().tws, Some(0.0));
        assert_eq!(engine.record().twa, Some(0.0));

        let speed = reading(200, Measurement::Speed { indicated: 6.0 / MS_TO_KNOTS });
        engine.handle(&speed).unwrap();
        engine.handle(&wind(300, 45.0, 15.0 / MS_TO_KNOTS, "Apparent")).unwrap();

        let expected = true_wind(Some(6.0), 15.0, 45.0);
        let record = engine.record();
        assert!((record.tws.unwrap() - expected.speed).abs() < 1e-9);
        assert!((record.twa.unwrap() - expected.angle).abs() < 1e-9);
    }

    #[test]
    fn attitude_fills_heel_and_pitch() {
        let mut engine = engine();
        engine.handle(&fix(0)).unwrap();
        let attitude = reading(
            50,
            Measurement::Attitude {
                pitch: 2.5,
                roll: -12.0,
            },
        );
        engine.handle(&attitude).unwrap();
        assert_eq!(engine.record().pitch, Some(2.5));
        assert_eq!(engine.record().heel, Some(-12.0));
        assert_eq!(attitude.source, DataSource::Ahrs);
    }
}
