use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Upper bound (inclusive, km/h) of the `elevada` band.
pub const HIGH_MAX_SPEED: f64 = 20.0;
/// Upper bound (inclusive, km/h) of the `média` band.
pub const MEDIUM_MAX_SPEED: f64 = 50.0;

/// Congestion level derived from a reading's average speed.
///
/// Never stored; always recomputed from the speed when a reading is
/// serialized or filtered on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum Intensity {
    #[serde(rename = "elevada")]
    High,
    #[serde(rename = "média")]
    Medium,
    #[serde(rename = "baixa")]
    Low,
}

impl Intensity {
    pub const ALL: [Intensity; 3] = [Intensity::High, Intensity::Medium, Intensity::Low];

    /// Total over every `f64`; negative speeds land in `High` and NaN in `Low`.
    pub fn classify(average_speed: f64) -> Intensity {
        if average_speed <= HIGH_MAX_SPEED {
            Intensity::High
        } else if average_speed <= MEDIUM_MAX_SPEED {
            Intensity::Medium
        } else {
            Intensity::Low
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Intensity::High => "elevada",
            Intensity::Medium => "média",
            Intensity::Low => "baixa",
        }
    }

    /// Exact, case and accent sensitive match against the canonical labels.
    pub fn from_label(label: &str) -> Option<Intensity> {
        Intensity::ALL.iter().copied().find(|i| i.label() == label)
    }

    /// Speed band `(exclusive lower, inclusive upper)` covered by this level.
    /// Lets a store push an intensity filter down as a plain range predicate.
    pub fn speed_band(self) -> (Option<f64>, Option<f64>) {
        match self {
            Intensity::High => (None, Some(HIGH_MAX_SPEED)),
            Intensity::Medium => (Some(HIGH_MAX_SPEED), Some(MEDIUM_MAX_SPEED)),
            Intensity::Low => (Some(MEDIUM_MAX_SPEED), None),
        }
    }
}

impl fmt::Display for Intensity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.label())
    }
}
