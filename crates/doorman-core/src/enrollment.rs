//! Duplicate-face check run before a new identity is written.
//!
//! The check and the later store write are not transactional: two
//! concurrent enrollments of the same face can both pass.

use crate::confidence::ConfidenceModel;
use crate::gallery::GalleryIndex;
use crate::matcher::{MatchEngine, SkippedEntry};
use crate::metric::{Distance, DistanceMetric, MetricError};
use crate::types::Embedding;

/// The active identity a candidate embedding collides with.
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    pub identity_id: String,
    pub identity_name: String,
    pub distance: f32,
    /// Confidence of the collision under the configured policy.
    pub similarity: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateCheck {
    pub conflict: Option<Conflict>,
    pub skipped: Vec<SkippedEntry>,
}

impl DuplicateCheck {
    pub fn is_duplicate(&self) -> bool {
        self.conflict.is_some()
    }
}

/// Rejects enrollments whose embedding already matches an active identity.
///
/// Uses the same scan as recognition, with its own threshold and no
/// minimum-confidence gate.
#[derive(Debug, Clone)]
pub struct EnrollmentGuard<D = DistanceMetric> {
    engine: MatchEngine<D>,
}

impl EnrollmentGuard<DistanceMetric> {
    pub fn new(metric: DistanceMetric, threshold: f32, confidence: ConfidenceModel) -> Self {
        Self::with_distance(metric, threshold, confidence)
    }
}

impl<D: Distance> EnrollmentGuard<D> {
    pub fn with_distance(distance: D, threshold: f32, confidence: ConfidenceModel) -> Self {
        Self {
            engine: MatchEngine::with_distance(distance, threshold, confidence),
        }
    }

    /// The candidate is validated even when the gallery is empty, so what
    /// gets stored is always comparable later.
    pub fn check_duplicate(&self, candidate: &Embedding, index: &GalleryIndex) -> Result<DuplicateCheck, MetricError> {
        self.engine.validate(candidate, index)?;
        let report = self.engine.identify(candidate, index)?;
        let result = report.result;

        let conflict = match (result.matched, result.identity_id) {
            (true, Some(identity_id)) => {
                tracing::info!(
                    identity = %identity_id,
                    distance = result.distance,
                    "enrollment candidate matches an existing identity"
                );
                Some(Conflict {
                    identity_name: result.identity_name.unwrap_or_default(),
                    identity_id,
                    distance: result.distance,
                    similarity: result.confidence,
                })
            }
            _ => None,
        };

        Ok(DuplicateCheck {
            conflict,
            skipped: report.skipped,
        })
    }
}
