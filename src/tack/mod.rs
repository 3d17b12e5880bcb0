//! Tack detection over a stream of apparent wind angles.
//!
//! The last [`TACK_HISTORY_DEPTH`] samples are kept in a ring. A tack is declared
//! whenever the ring holds exactly half port and half starboard samples, and the
//! reported time is the sample stored at the ring's midpoint cell.
//!
//! The midpoint cell is not necessarily where the side flipped: once the ring has
//! wrapped, cell `depth / 2` holds whatever sample last landed there, and off-wind
//! samples can make the counts balance without a clean flip. Kept as is so results
//! match earlier analyses.

use chrono::{DateTime, Utc};

/// Roughly two seconds of wind data at the logger's rate.
pub const TACK_HISTORY_DEPTH: usize = 10;

const _: () = assert!(TACK_HISTORY_DEPTH % 2 == 0, "history depth must be even");

/// AWA at or below this is starboard tack.
pub const STARBOARD_MAX_AWA: f64 = 45.0;
/// AWA at or above this is port tack.
pub const PORT_MIN_AWA: f64 = 315.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TackSide {
    Starboard,
    Port,
    #[default]
    OffWind,
}

impl TackSide {
    pub fn from_awa(awa: f64) -> Self {
        if awa <= STARBOARD_MAX_AWA {
            Self::Starboard
        } else if awa >= PORT_MIN_AWA {
            Self::Port
        } else {
            Self::OffWind
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Sample {
    side: TackSide,
    ts: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct TackDetector {
    ring: [Sample; TACK_HISTORY_DEPTH],
    index: usize,
}

impl TackDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one sample; returns the tack time if the ring is now balanced.
    pub fn push(&mut self, awa: f64, ts: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.ring[self.index] = Sample {
            side: TackSide::from_awa(awa),
            ts: Some(ts),
        };
        self.index = (self.index + 1) % TACK_HISTORY_DEPTH;

        let (port, starboard) = self.ring.iter().fold((0, 0), |(pt, stb), sample| {
            match sample.side {
                TackSide::Port => (pt + 1, stb),
                TackSide::Starboard => (pt, stb + 1),
                TackSide::OffWind => (pt, stb),
            }
        });

        let half = TACK_HISTORY_DEPTH / 2;
        if port == starboard && port == half {
            self.ring[half].ts
        } else {
            None
        }
    }

    /// Runs a fresh detector over `samples`, collecting every tack time.
    pub fn detect<I>(samples: I) -> Vec<DateTime<Utc>>
    where
        I: IntoIterator<Item = (f64, DateTime<Utc>)>,
    {
        let mut detector = Self::new();
        samples
            .into_iter()
            .filter_map(|(awa, ts)| detector.push(awa, ts))
            .collect()
    }
}
