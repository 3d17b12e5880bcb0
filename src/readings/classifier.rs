use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TelemetryError;

use super::timestamp::parse_timestamp;

const ENABLE_LOGS: bool = true;

use crate::log_debug;

pub const APPARENT_WIND_REFERENCE: &str = "Apparent";
pub const TRUE_COG_REFERENCE: &str = "True";

/// Untyped logger line. Lives only for one classify step.
#[derive(Debug, Deserialize)]
pub struct RawReading {
    pub description: Option<String>,
    pub timestamp: Option<String>,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorClass {
    Position,
    Speed,
    Heading,
    Wind,
    Attitude,
    CourseOverGround,
}

impl SensorClass {
    pub fn from_description(description: &str) -> Option<Self> {
        match description {
            "Position, Rapid Update" => Some(Self::Position),
            "Speed" => Some(Self::Speed),
            "Vessel Heading" => Some(Self::Heading),
            "Wind Data" => Some(Self::Wind),
            "Attitude" => Some(Self::Attitude),
            "COG & SOG, Rapid Update" => Some(Self::CourseOverGround),
            _ => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Position => "Position, Rapid Update",
            Self::Speed => "Speed",
            Self::Heading => "Vessel Heading",
            Self::Wind => "Wind Data",
            Self::Attitude => "Attitude",
            Self::CourseOverGround => "COG & SOG, Rapid Update",
        }
    }

    pub fn source(&self) -> DataSource {
        match self {
            Self::Position | Self::CourseOverGround => DataSource::Gps,
            Self::Speed => DataSource::Log,
            Self::Heading => DataSource::Compass,
            Self::Wind => DataSource::Anemometer,
            Self::Attitude => DataSource::Ahrs,
        }
    }
}

/// Which instrument produced a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Gps,
    Log,
    Compass,
    Anemometer,
    Ahrs,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindData {
    /// Degrees relative to the bow, 0..360.
    pub angle: f64,
    /// m/s
    pub speed: f64,
    pub reference: String,
}

impl WindData {
    /// `(angle, speed)` if the reading is in the apparent frame.
    pub fn apparent(&self) -> Result<(f64, f64), TelemetryError> {
        if self.reference == APPARENT_WIND_REFERENCE {
            Ok((self.angle, self.speed))
        } else {
            Err(TelemetryError::ReferenceMismatch {
                kind: "wind",
                expected: APPARENT_WIND_REFERENCE,
                found: self.reference.clone(),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CourseOverGroundData {
    pub cog: f64,
    /// m/s
    pub sog: f64,
    pub reference: String,
}

impl CourseOverGroundData {
    pub fn true_course(&self) -> Result<f64, TelemetryError> {
        if self.reference == TRUE_COG_REFERENCE {
            Ok(self.cog)
        } else {
            Err(TelemetryError::ReferenceMismatch {
                kind: "COG",
                expected: TRUE_COG_REFERENCE,
                found: self.reference.clone(),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Measurement {
    Position { lat: f64, long: f64 },
    Speed { indicated: f64 },
    Heading { magnetic: f64, variation: Option<f64> },
    Wind(WindData),
    Attitude { pitch: f64, roll: f64 },
    CourseOverGround(CourseOverGroundData),
}

impl Measurement {
    pub fn class(&self) -> SensorClass {
        match self {
            Self::Position { .. } => SensorClass::Position,
            Self::Speed { .. } => SensorClass::Speed,
            Self::Heading { .. } => SensorClass::Heading,
            Self::Wind(_) => SensorClass::Wind,
            Self::Attitude { .. } => SensorClass::Attitude,
            Self::CourseOverGround(_) => SensorClass::CourseOverGround,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedReading {
    pub timestamp: DateTime<Utc>,
    pub source: DataSource,
    pub measurement: Measurement,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    Malformed(String),
    MissingDescription,
    UnknownDescription(String),
    MissingTimestamp,
    MissingField {
        class: SensorClass,
        field: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    Reading(TypedReading),
    Skip(SkipReason),
}

/// Classifies one logger line.
///
/// Anything that is not a recognised, complete reading comes back as
/// [`Classified::Skip`]. Only a timestamp that will not parse is an error, because
/// callers disagree on whether that should end the run.
pub fn classify_line(line: &str) -> Result<Classified, TelemetryError> {
    let raw: RawReading = match serde_json::from_str(line) {
        Ok(raw) => raw,
        Err(err) => {
            log_debug!("skipping malformed logger line: {err}");
            return Ok(Classified::Skip(SkipReason::Malformed(err.to_string())));
        }
    };
    classify(raw)
}

pub fn classify(raw: RawReading) -> Result<Classified, TelemetryError> {
    let Some(description) = raw.description.as_deref() else {
        return Ok(Classified::Skip(SkipReason::MissingDescription));
    };
    let Some(class) = SensorClass::from_description(description) else {
        return Ok(Classified::Skip(SkipReason::UnknownDescription(
            description.to_string(),
        )));
    };
    let Some(raw_timestamp) = raw.timestamp.as_deref() else {
        return Ok(Classified::Skip(SkipReason::MissingTimestamp));
    };
    let timestamp = parse_timestamp(raw_timestamp)?;

    let measurement = match extract_measurement(class, &raw.fields) {
        Ok(measurement) => measurement,
        Err(field) => {
            log_debug!("skipping {} reading without {field}", class.description());
            return Ok(Classified::Skip(SkipReason::MissingField { class, field }));
        }
    };

    Ok(Classified::Reading(TypedReading {
        timestamp,
        source: class.source(),
        measurement,
    }))
}

fn extract_measurement(
    class: SensorClass,
    fields: &Map<String, Value>,
) -> Result<Measurement, &'static str> {
    let measurement = match class {
        SensorClass::Position => Measurement::Position {
            lat: number(fields, "Latitude")?,
            long: number(fields, "Longitude")?,
        },
        SensorClass::Speed => Measurement::Speed {
            indicated: number(fields, "Speed Water Referenced")?,
        },
        SensorClass::Heading => Measurement::Heading {
            magnetic: number(fields, "Heading")?,
            variation: fields.get("Variation").and_then(Value::as_f64),
        },
        SensorClass::Wind => Measurement::Wind(WindData {
            angle: number(fields, "Wind Angle")?,
            speed: number(fields, "Wind Speed")?,
            reference: reference_name(fields.get("Reference")),
        }),
        SensorClass::Attitude => Measurement::Attitude {
            pitch: number(fields, "Pitch")?,
            roll: number(fields, "Roll")?,
        },
        SensorClass::CourseOverGround => Measurement::CourseOverGround(CourseOverGroundData {
            cog: number(fields, "COG")?,
            sog: number(fields, "SOG")?,
            reference: reference_name(fields.get("COG Reference")),
        }),
    };
    Ok(measurement)
}

fn number(fields: &Map<String, Value>, key: &'static str) -> Result<f64, &'static str> {
    fields.get(key).and_then(Value::as_f64).ok_or(key)
}

/// Enum fields arrive either as `{"name": "Apparent", "value": 2}` or as a bare string.
fn reference_name(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(name)) => name.clone(),
        Some(Value::Object(obj)) => obj
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}
