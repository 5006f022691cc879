//! Embedding provider collaborator interface.

use crate::types::{Embedding, EmbeddingError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("multiple faces detected; ensure only one face is visible")]
    MultipleFacesDetected,
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),
}

impl ExtractionError {
    /// Short reason recorded in the audit log.
    pub fn reason(&self) -> String {
        match self {
            Self::NoFaceDetected => "no face detected".to_string(),
            Self::MultipleFacesDetected => "multiple faces".to_string(),
            Self::ExtractionFailed(detail) => format!("extraction failed: {detail}"),
        }
    }
}

impl From<EmbeddingError> for ExtractionError {
    fn from(err: EmbeddingError) -> Self {
        Self::ExtractionFailed(format!("provider returned an invalid embedding: {err}"))
    }
}

/// Turns an encoded image into exactly one face embedding.
///
/// Implementations must refuse images with more than one face instead of
/// picking one.
pub trait EmbeddingProvider: Send + Sync {
    fn extract(&self, image: &[u8]) -> Result<Embedding, ExtractionError>;

    /// Tag of the model producing the embeddings (e.g. "Facenet512").
    fn model(&self) -> &str;
}

/// Reduce a provider's per-face vectors to the single face it must contain.
pub fn single_face(mut faces: Vec<Vec<f32>>) -> Result<Embedding, ExtractionError> {
    match faces.len() {
        0 => Err(ExtractionError::NoFaceDetected),
        1 => Ok(Embedding::new(faces.remove(0))?),
        _ => Err(ExtractionError::MultipleFacesDetected),
    }
}
