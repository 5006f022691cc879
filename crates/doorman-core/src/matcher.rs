//! Best-match search of a query embedding over a gallery index.

use crate::confidence::ConfidenceModel;
use crate::gallery::GalleryIndex;
use crate::metric::{Distance, DistanceMetric, MetricError};
use crate::types::{Embedding, Identity, MatchResult, NoMatchReason};
use serde::{Deserialize, Serialize};

/// Metric, threshold and scoring used for one kind of decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchPolicy {
    pub metric: DistanceMetric,
    /// A candidate matches only when its distance is strictly below this.
    pub threshold: f32,
    pub confidence: ConfidenceModel,
    /// Optional gate on the confidence of an otherwise matching candidate.
    #[serde(default)]
    pub min_confidence: Option<f32>,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            metric: DistanceMetric::Cosine,
            threshold: 0.40,
            confidence: ConfidenceModel::Linear,
            min_confidence: None,
        }
    }
}

/// A gallery entry left out of the scan because it could not be compared
/// with the query.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedEntry {
    pub identity_id: String,
    pub error: MetricError,
}

/// Outcome of [`MatchEngine::identify`].
#[derive(Debug, Clone, PartialEq)]
pub struct MatchReport {
    pub result: MatchResult,
    /// Number of entries a distance was computed for.
    pub compared: usize,
    pub skipped: Vec<SkippedEntry>,
}

/// Finds the closest enrolled identity to a query embedding.
///
/// Scans every entry once in index order. The first entry reaching the
/// minimum distance wins ties.
#[derive(Debug, Clone)]
pub struct MatchEngine<D = DistanceMetric> {
    distance: D,
    threshold: f32,
    confidence: ConfidenceModel,
    min_confidence: Option<f32>,
}

impl MatchEngine<DistanceMetric> {
    pub fn new(policy: MatchPolicy) -> Self {
        Self::with_distance(policy.metric, policy.threshold, policy.confidence)
            .with_min_confidence(policy.min_confidence)
    }
}

impl<D: Distance> MatchEngine<D> {
    pub fn with_distance(distance: D, threshold: f32, confidence: ConfidenceModel) -> Self {
        Self {
            distance,
            threshold,
            confidence,
            min_confidence: None,
        }
    }

    pub fn with_min_confidence(mut self, min_confidence: Option<f32>) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn confidence_model(&self) -> ConfidenceModel {
        self.confidence
    }

    /// Match `query` against every entry of `index`.
    ///
    /// Errors only when the query itself is unusable: wrong length for the
    /// index's pinned dimension, or degenerate under the metric. Entries that
    /// cannot be compared are skipped and reported.
    pub fn identify(&self, query: &Embedding, index: &GalleryIndex) -> Result<MatchReport, MetricError> {
        if index.is_empty() {
            return Ok(MatchReport {
                result: MatchResult::no_match(f32::INFINITY, NoMatchReason::EmptyGallery),
                compared: 0,
                skipped: Vec::new(),
            });
        }

        self.validate(query, index)?;

        let mut best: Option<(f32, &Identity)> = None;
        let mut compared = 0;
        let mut skipped = Vec::new();

        for (id, identity) in index.entries() {
            match self.distance.distance(query, &identity.embedding) {
                Ok(d) => {
                    compared += 1;
                    // Strict comparison keeps the earliest entry on ties.
                    if best.map_or(true, |(best_d, _)| d < best_d) {
                        best = Some((d, identity));
                    }
                }
                Err(error) => {
                    tracing::warn!(identity = %id, %error, "skipping gallery entry");
                    skipped.push(SkippedEntry {
                        identity_id: id.to_string(),
                        error,
                    });
                }
            }
        }

        let result = match best {
            None => MatchResult::no_match(f32::INFINITY, NoMatchReason::NoComparableEntries),
            Some((distance, identity)) => self.decide(distance, identity),
        };

        tracing::debug!(
            matched = result.matched,
            identity = ?result.identity_id,
            distance = result.distance,
            confidence = result.confidence,
            compared,
            skipped = skipped.len(),
            "match decision"
        );

        Ok(MatchReport {
            result,
            compared,
            skipped,
        })
    }

    /// Check `query` against the index's pinned dimension and the metric's
    /// requirements, without comparing it to any entry.
    pub fn validate(&self, query: &Embedding, index: &GalleryIndex) -> Result<(), MetricError> {
        if let Some(expected) = index.dimension() {
            if query.len() != expected {
                return Err(MetricError::DimensionMismatch {
                    expected,
                    actual: query.len(),
                });
            }
        }
        self.distance.check(query)
    }

    fn decide(&self, distance: f32, identity: &Identity) -> MatchResult {
        if distance >= self.threshold {
            return MatchResult::no_match(distance, NoMatchReason::BelowThreshold);
        }

        let confidence = self.confidence.score(distance, self.threshold);
        if let Some(min) = self.min_confidence {
            if confidence < min {
                return MatchResult::no_match(distance, NoMatchReason::LowConfidence);
            }
        }

        MatchResult {
            matched: true,
            identity_id: Some(identity.id.clone()),
            identity_name: Some(identity.name.clone()),
            distance,
            confidence,
            reason: None,
        }
    }
}
