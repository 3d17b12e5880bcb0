use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::TelemetryError;
use crate::readings::timestamp::millis;
use crate::store::Document;

/// Output columns, in the order the export format expects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    IsoDateTimeUtc,
    Lat,
    Lon,
    BoatSpeed,
    Heading,
    Awa,
    Aws,
    Tws,
    Twa,
    Cog,
    Sog,
    Heel,
    Pitch,
}

pub const COLUMNS: [Column; 13] = [
    Column::IsoDateTimeUtc,
    Column::Lat,
    Column::Lon,
    Column::BoatSpeed,
    Column::Heading,
    Column::Awa,
    Column::Aws,
    Column::Tws,
    Column::Twa,
    Column::Cog,
    Column::Sog,
    Column::Heel,
    Column::Pitch,
];

impl Column {
    pub fn header(&self) -> &'static str {
        match self {
            Self::IsoDateTimeUtc => "ISODateTimeUTC",
            Self::Lat => "Lat",
            Self::Lon => "Lon",
            Self::BoatSpeed => "BoatSpeed",
            Self::Heading => "Heading",
            Self::Awa => "AWA",
            Self::Aws => "AWS",
            Self::Tws => "TWS",
            Self::Twa => "TWA",
            Self::Cog => "COG",
            Self::Sog => "SOG",
            Self::Heel => "Heel",
            Self::Pitch => "Pitch",
        }
    }
}

/// Latest value seen for every fused field. Never cleared: a field keeps its last
/// value until the sensor reports again. Speeds are knots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompositeRecord {
    pub timestamp: Option<DateTime<Utc>>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub boat_speed: Option<f64>,
    pub heading: Option<f64>,
    pub awa: Option<f64>,
    pub aws: Option<f64>,
    pub tws: Option<f64>,
    pub twa: Option<f64>,
    pub cog: Option<f64>,
    pub sog: Option<f64>,
    pub heel: Option<f64>,
    pub pitch: Option<f64>,
}

impl CompositeRecord {
    /// Freezes the current values into an output row.
    pub fn snapshot(&self) -> Result<FusedRow, TelemetryError> {
        let missing = |column: Column| TelemetryError::MissingMandatoryField(column.header());
        Ok(FusedRow {
            timestamp: self.timestamp.ok_or_else(|| missing(Column::IsoDateTimeUtc))?,
            lat: self.lat.ok_or_else(|| missing(Column::Lat))?,
            lon: self.lon.ok_or_else(|| missing(Column::Lon))?,
            boat_speed: self.boat_speed,
            heading: self.heading,
            awa: self.awa,
            aws: self.aws,
            tws: self.tws,
            twa: self.twa,
            cog: self.cog,
            sog: self.sog,
            heel: self.heel,
            pitch: self.pitch,
        })
    }
}

/// One emitted window. Mandatory columns are guaranteed present.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FusedRow {
    #[serde(rename = "ts", with = "millis")]
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    #[serde(rename = "long")]
    pub lon: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boat_speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub awa: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aws: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tws: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twa: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cog: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sog: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heel: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f64>,
}

impl FusedRow {
    /// Numeric value of `column`; `None` for the timestamp column or unobserved fields.
    pub fn value(&self, column: Column) -> Option<f64> {
        match column {
            Column::IsoDateTimeUtc => None,
            Column::Lat => Some(self.lat),
            Column::Lon => Some(self.lon),
            Column::BoatSpeed => self.boat_speed,
            Column::Heading => self.heading,
            Column::Awa => self.awa,
            Column::Aws => self.aws,
            Column::Tws => self.tws,
            Column::Twa => self.twa,
            Column::Cog => self.cog,
            Column::Sog => self.sog,
            Column::Heel => self.heel,
            Column::Pitch => self.pitch,
        }
    }

    pub fn to_document(&self) -> Result<Document> {
        serde_json::to_value(self).context("failed to serialise fused row")
    }
}
