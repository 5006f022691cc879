use crate::engine::EngineError;
use axum::extract::rejection::{BytesRejection, JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use doorman_core::{ExtractionError, MetricError, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::json;

pub type ApiResult<T> = Result<T, ApiError>;

/// Failures rendered to HTTP clients.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("{0}")]
    Extraction(ExtractionError),

    #[error("face already registered as '{name}' ({id})")]
    DuplicateIdentity { id: String, name: String, similarity: f32 },

    #[error("user not found: {0}")]
    NotFound(String),

    #[error("user id already exists: {0}")]
    Conflict(String),

    #[error("unusable face embedding: {0}")]
    UnusableEmbedding(MetricError),

    #[error("storage unavailable")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Extraction(_) | ApiError::DuplicateIdentity { .. } => {
                StatusCode::BAD_REQUEST
            }
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::UnusableEmbedding(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::Extraction(ExtractionError::NoFaceDetected) => "NO_FACE_DETECTED",
            ApiError::Extraction(ExtractionError::MultipleFacesDetected) => "MULTIPLE_FACES_DETECTED",
            ApiError::Extraction(ExtractionError::ExtractionFailed(_)) => "EXTRACTION_FAILED",
            ApiError::DuplicateIdentity { .. } => "DUPLICATE_IDENTITY",
            ApiError::NotFound(_) => "IDENTITY_NOT_FOUND",
            ApiError::Conflict(_) => "IDENTITY_EXISTS",
            ApiError::UnusableEmbedding(MetricError::DimensionMismatch { .. }) => "DIMENSION_MISMATCH",
            ApiError::UnusableEmbedding(MetricError::DegenerateVector) => "DEGENERATE_VECTOR",
            ApiError::Unavailable(_) => "STORE_UNAVAILABLE",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            ApiError::DuplicateIdentity { id, name, similarity } => Some(json!({
                "existing_user_id": id,
                "existing_name": name,
                "similarity": similarity,
            })),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            // Storage details stay in the log, clients get a fixed message
            ApiError::Unavailable(detail) | ApiError::Internal(detail) => {
                tracing::error!(status = status.as_u16(), error = %detail, "request failed");
            }
            _ => tracing::debug!(status = status.as_u16(), error = %self, "request rejected"),
        }

        let body = ErrorResponse {
            success: false,
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
                details: self.details(),
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Extraction(e) => ApiError::Extraction(e),
            EngineError::Metric(e) => ApiError::UnusableEmbedding(e),
            EngineError::Store(e) => e.into(),
            EngineError::DuplicateIdentity { id, name, similarity } => {
                ApiError::DuplicateIdentity { id, name, similarity }
            }
            EngineError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            EngineError::ChannelClosed | EngineError::Spawn(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::IdentityNotFound(id) => ApiError::NotFound(id),
            StoreError::IdentityExists(id) => ApiError::Conflict(id),
            StoreError::Unavailable(_) | StoreError::Corrupt(_) => ApiError::Unavailable(err.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        body_rejection(rejection.status(), rejection.body_text())
    }
}

impl From<BytesRejection> for ApiError {
    fn from(rejection: BytesRejection) -> Self {
        body_rejection(rejection.status(), rejection.body_text())
    }
}

fn body_rejection(status: StatusCode, text: String) -> ApiError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(text)
    } else {
        ApiError::BadRequest(text)
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}
