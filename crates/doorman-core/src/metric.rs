//! Embedding distance metrics.
//!
//! `euclidean` and `euclidean_l2` compute the same value. Both names are
//! kept because published threshold tables are keyed by either one.

use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricError {
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("zero-norm embedding has no direction")]
    DegenerateVector,
}

/// Selectable dissimilarity measure between two embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Euclidean,
    EuclideanL2,
}

impl DistanceMetric {
    pub const ALL: [DistanceMetric; 3] = [Self::Cosine, Self::Euclidean, Self::EuclideanL2];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Euclidean => "euclidean",
            Self::EuclideanL2 => "euclidean_l2",
        }
    }

    /// Distance between `a` and `b` under this metric.
    pub fn distance(self, a: &Embedding, b: &Embedding) -> Result<f32, MetricError> {
        check_dimensions(a, b)?;
        match self {
            Self::Cosine => cosine(a.as_slice(), b.as_slice()),
            Self::Euclidean => Ok(euclidean(a.as_slice(), b.as_slice())),
            Self::EuclideanL2 => Ok(euclidean_l2(a.as_slice(), b.as_slice())),
        }
    }

    /// Reject a query vector this metric cannot compare against anything.
    pub fn check(self, v: &Embedding) -> Result<(), MetricError> {
        match self {
            Self::Cosine if v.norm() == 0.0 => Err(MetricError::DegenerateVector),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown distance metric '{s}' (expected cosine, euclidean or euclidean_l2)"))
    }
}

/// Distance computation used by the matcher.
///
/// Implemented by [`DistanceMetric`]; other implementations exist for tests
/// that need to observe or script the comparisons.
pub trait Distance {
    fn distance(&self, a: &Embedding, b: &Embedding) -> Result<f32, MetricError>;

    fn check(&self, _query: &Embedding) -> Result<(), MetricError> {
        Ok(())
    }
}

impl Distance for DistanceMetric {
    fn distance(&self, a: &Embedding, b: &Embedding) -> Result<f32, MetricError> {
        DistanceMetric::distance(*self, a, b)
    }

    fn check(&self, query: &Embedding) -> Result<(), MetricError> {
        DistanceMetric::check(*self, query)
    }
}

fn check_dimensions(a: &Embedding, b: &Embedding) -> Result<(), MetricError> {
    if a.len() != b.len() {
        return Err(MetricError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }
    Ok(())
}

/// `1 - cos(a, b)`, in [0, 2].
fn cosine(a: &[f32], b: &[f32]) -> Result<f32, MetricError> {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Err(MetricError::DegenerateVector);
    }

    let similarity = (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0);
    Ok((1.0 - similarity) as f32)
}

/// L2 norm of `a - b`.
fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    let diff_norm_sq: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(&x, &y)| f64::from(x) - f64::from(y))
        .map(|d| d * d)
        .sum();
    diff_norm_sq.sqrt() as f32
}

/// `sqrt(sum((a_i - b_i)^2))`.
fn euclidean_l2(a: &[f32], b: &[f32]) -> f32 {
    let sum = a.iter().zip(b.iter()).fold(0.0f64, |acc, (&x, &y)| {
        let d = f64::from(x) - f64::from(y);
        acc + d * d
    });
    sum.sqrt() as f32
}
