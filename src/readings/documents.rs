//! Store-side shape of each reading type.
//!
//! Only `metadata` is meant to change after a document is written, so anything
//! describing where a reading came from lives there.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::Document;

use super::classifier::{DataSource, Measurement, TypedReading};
use super::timestamp::millis;

const ENABLE_LOGS: bool = true;

use crate::log_debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub source: DataSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// Position as written by the transform and read back by the downsampler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionDocument {
    #[serde(with = "millis")]
    pub ts: DateTime<Utc>,
    pub metadata: Metadata,
    pub lat: f64,
    pub long: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeedDocument {
    #[serde(with = "millis")]
    ts: DateTime<Utc>,
    metadata: Metadata,
    indicated_boat_speed: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HeadingDocument {
    #[serde(with = "millis")]
    ts: DateTime<Utc>,
    metadata: Metadata,
    magnetic_heading: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    variation: Option<f64>,
}

/// Wind measurements are only kept when they are apparent.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindDocument {
    #[serde(with = "millis")]
    pub ts: DateTime<Utc>,
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apparent_wind_angle: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apparent_wind_speed: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AttitudeDocument {
    #[serde(with = "millis")]
    ts: DateTime<Utc>,
    metadata: Metadata,
    pitch: f64,
    roll: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CourseOverGroundDocument {
    #[serde(with = "millis")]
    ts: DateTime<Utc>,
    metadata: Metadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    cog: Option<f64>,
    sog: f64,
}

/// Field the downsampler and position queries filter on.
pub const POSITION_FIELD: &str = "lat";
/// Field the tack query filters on.
pub const WIND_ANGLE_FIELD: &str = "apparentWindAngle";

impl TypedReading {
    /// Serialises the reading for the store.
    ///
    /// A wind or COG reading in the wrong reference frame still produces a document,
    /// minus the frame-dependent fields.
    pub fn to_document(&self) -> Result<Document> {
        let ts = self.timestamp;
        let source = self.source;
        let plain = Metadata {
            source,
            reference: None,
        };

        let value = match &self.measurement {
            Measurement::Position { lat, long } => serde_json::to_value(PositionDocument {
                ts,
                metadata: plain,
                lat: *lat,
                long: *long,
            }),
            Measurement::Speed { indicated } => serde_json::to_value(SpeedDocument {
                ts,
                metadata: plain,
                indicated_boat_speed: *indicated,
            }),
            Measurement::Heading {
                magnetic,
                variation,
            } => serde_json::to_value(HeadingDocument {
                ts,
                metadata: plain,
                magnetic_heading: *magnetic,
                variation: *variation,
            }),
            Measurement::Wind(wind) => {
                let apparent = match wind.apparent() {
                    Ok(apparent) => Some(apparent),
                    Err(err) => {
                        log_debug!("dropping wind fields at {ts}: {err}");
                        None
                    }
                };
                serde_json::to_value(WindDocument {
                    ts,
                    metadata: Metadata {
                        source,
                        reference: Some(wind.reference.clone()),
                    },
                    apparent_wind_angle: apparent.map(|(angle, _)| angle),
                    apparent_wind_speed: apparent.map(|(_, speed)| speed),
                })
            }
            Measurement::Attitude { pitch, roll } => serde_json::to_value(AttitudeDocument {
                ts,
                metadata: plain,
                pitch: *pitch,
                roll: *roll,
            }),
            Measurement::CourseOverGround(course) => {
                let cog = match course.true_course() {
                    Ok(cog) => Some(cog),
                    Err(err) => {
                        log_debug!("dropping COG at {ts}: {err}");
                        None
                    }
                };
                serde_json::to_value(CourseOverGroundDocument {
                    ts,
                    metadata: Metadata {
                        source,
                        reference: Some(course.reference.clone()),
                    },
                    cog,
                    sog: course.sog,
                })
            }
        };

        value.with_context(|| format!("failed to serialise {:?} reading", self.measurement.class()))
    }
}
