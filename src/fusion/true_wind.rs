//! True wind from the apparent wind and boat speed through the water.
//!
//! Boat velocity, apparent wind and true wind close a triangle, so both unknowns fall
//! out of the law of cosines. No leeway or current correction.
//!
//! The angle is only right on starboard (AWA 0..=180). The correction is always added,
//! so on port it moves away from the bow instead of towards it: AWA 315 at 6 kn boat
//! speed and 15 kn apparent gives 336.5, where the vector solution is 293.5. Stored
//! TWA keeps this behaviour so rows stay comparable with earlier conversions.

/// m/s to knots, as used by the logger's instruments.
pub const MS_TO_KNOTS: f64 = 1.944;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrueWind {
    pub speed: f64,
    /// Degrees, same convention as the apparent angle it was derived from. Off by
    /// twice the correction on port; see the module docs.
    pub angle: f64,
}

impl TrueWind {
    pub const CALM: TrueWind = TrueWind {
        speed: 0.0,
        angle: 0.0,
    };
}

/// `boat_speed` and `aws` share a unit (knots here); `awa` is degrees off the bow.
///
/// Without a boat speed both values are zero.
pub fn true_wind(boat_speed: Option<f64>, aws: f64, awa: f64) -> TrueWind {
    let Some(bs) = boat_speed else {
        return TrueWind::CALM;
    };

    let tws = true_wind_speed(bs, aws, awa);
    TrueWind {
        speed: tws,
        angle: true_wind_angle(bs, aws, tws, awa),
    }
}

/// TWS² = BS² + AWS² − 2·BS·AWS·cos(AWA)
pub fn true_wind_speed(bs: f64, aws: f64, awa: f64) -> f64 {
    let squared = bs * bs + aws * aws - 2.0 * bs * aws * awa.to_radians().cos();
    squared.max(0.0).sqrt()
}

/// AWA plus the angle between apparent and true wind, which sits opposite the boat
/// speed side: cos θ = (AWS² + TWS² − BS²) / (2·AWS·TWS).
pub fn true_wind_angle(bs: f64, aws: f64, tws: f64, awa: f64) -> f64 {
    let denominator = 2.0 * aws * tws;
    if denominator == 0.0 {
        return awa;
    }
    let cos_theta = ((aws * aws + tws * tws - bs * bs) / denominator).clamp(-1.0, 1.0);
    cos_theta.acos().to_degrees() + awa
}
