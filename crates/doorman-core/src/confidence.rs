//! Distance → confidence scoring.
//!
//! Two policies exist because stored thresholds are tied to the formula
//! they were tuned against; the daemon exposes the choice in its config.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Exponent of the sigmoid-tail curve below the threshold.
const SIGMOID_TAIL_EXPONENT: f32 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceModel {
    /// `1 - distance`. Meaningful for cosine distance of unit vectors.
    #[default]
    Linear,
    /// Piecewise curve: 0.5 at the threshold, steep towards distance 0,
    /// a gentle decay above the threshold.
    SigmoidTail,
}

impl ConfidenceModel {
    pub const ALL: [ConfidenceModel; 2] = [Self::Linear, Self::SigmoidTail];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::SigmoidTail => "sigmoid_tail",
        }
    }

    /// Confidence in [0, 1] for `distance` under `threshold`.
    pub fn score(self, distance: f32, threshold: f32) -> f32 {
        let raw = match self {
            Self::Linear => linear(distance),
            Self::SigmoidTail => sigmoid_tail(distance, threshold),
        };
        if raw.is_nan() {
            0.0
        } else {
            raw.clamp(0.0, 1.0)
        }
    }
}

impl fmt::Display for ConfidenceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfidenceModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown confidence policy '{s}' (expected linear or sigmoid_tail)"))
    }
}

fn linear(distance: f32) -> f32 {
    1.0 - distance
}

fn sigmoid_tail(distance: f32, threshold: f32) -> f32 {
    if distance > threshold {
        let range = 1.0 - threshold;
        // Departs from the plain formula: with T >= 1 (Euclidean thresholds)
        // the tail would divide by zero or flip sign, so it scores 0.
        if range <= 0.0 {
            return 0.0;
        }
        (1.0 - distance) / (range * 2.0)
    } else {
        if threshold <= 0.0 {
            // distance <= threshold <= 0: as close as it gets
            return 1.0;
        }
        let linear = 1.0 - distance / (threshold * 2.0);
        // linear >= 0.5 here, so the base is never negative; 0^0.2 == 0 at d == T.
        let base = ((linear - 0.5) * 2.0).max(0.0);
        linear + (1.0 - linear) * base.powf(SIGMOID_TAIL_EXPONENT)
    }
}
