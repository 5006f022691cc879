use super::{decode_image, ensure_image, required};
use crate::engine::{Recognition, Registration};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::rejection::{BytesRejection, JsonRejection};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use doorman_core::Identity;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub image: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub message: String,
    pub user_id: String,
    pub name: String,
}

/// Enroll a new identity from one face image.
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = payload?;
    let name = required("name", req.name)?;
    let image = decode_image("image", &required("image", req.image)?)?;

    let identity = state
        .engine
        .register(
            image,
            Registration {
                name,
                email: req.email,
                phone: req.phone,
                id: req.user_id,
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            success: true,
            message: format!("User {} registered successfully", identity.name),
            user_id: identity.id,
            name: identity.name,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct RecognizeRequest {
    pub image: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IdentitySummary {
    pub user_id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl From<Identity> for IdentitySummary {
    fn from(identity: Identity) -> Self {
        Self {
            user_id: identity.id,
            name: identity.name,
            email: identity.email,
            phone: identity.phone,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecognizeResponse {
    /// False only when no embedding could be extracted.
    pub success: bool,
    pub authorized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentitySummary>,
    pub confidence: f32,
    /// Absent when nothing was compared.
    pub distance: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub message: String,
}

/// Decide access for the face in the posted image.
///
/// Accepts either a JSON body `{"image": "<base64>"}` or raw `image/*` bytes,
/// as door cameras post them.
pub async fn recognize(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> ApiResult<Json<RecognizeResponse>> {
    let body = body?;
    let image = if is_raw_image(&headers) {
        ensure_image("body", &body)?;
        body.to_vec()
    } else {
        let req: RecognizeRequest = serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))?;
        decode_image("image", &required("image", req.image)?)?
    };

    let response = match state.engine.recognize(image).await? {
        Recognition::Decided { result, identity } => match identity {
            Some(identity) if result.matched => RecognizeResponse {
                success: true,
                authorized: true,
                message: format!("Access granted: welcome {}", identity.name),
                identity: Some(identity.into()),
                confidence: result.confidence,
                distance: Some(result.distance),
                reason: None,
            },
            _ => {
                let reason = result.reason.map(|r| r.as_str()).unwrap_or("no match");
                RecognizeResponse {
                    success: true,
                    authorized: false,
                    identity: None,
                    confidence: 0.0,
                    distance: result.distance.is_finite().then_some(result.distance),
                    reason: Some(reason.to_string()),
                    message: format!("Access denied: {reason}"),
                }
            }
        },
        Recognition::Rejected(err) => RecognizeResponse {
            success: false,
            authorized: false,
            identity: None,
            confidence: 0.0,
            distance: None,
            reason: Some(err.reason()),
            message: err.to_string(),
        },
    };

    Ok(Json(response))
}

fn is_raw_image(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| {
            let ct = ct.trim().to_ascii_lowercase();
            ct.starts_with("image/") || ct.starts_with("application/octet-stream")
        })
        .unwrap_or(false)
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub image1: Option<String>,
    pub image2: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub success: bool,
    pub verified: bool,
    pub distance: f32,
    pub threshold: f32,
    /// Percentage, two decimals.
    pub similarity: f32,
    pub confidence: f32,
    pub model: String,
    pub metric: String,
}

/// Compare the faces in two images without touching the gallery.
pub async fn verify(
    State(state): State<AppState>,
    payload: Result<Json<VerifyRequest>, JsonRejection>,
) -> ApiResult<Json<VerifyResponse>> {
    let Json(req) = payload?;
    let first = decode_image("image1", &required("image1", req.image1)?)?;
    let second = decode_image("image2", &required("image2", req.image2)?)?;

    let outcome = state.engine.verify(first, second).await?;
    Ok(Json(VerifyResponse {
        success: true,
        verified: outcome.verified,
        distance: outcome.distance,
        threshold: outcome.threshold,
        similarity: outcome.similarity,
        confidence: outcome.confidence,
        model: state.config.provider_model.clone(),
        metric: state.config.metric.to_string(),
    }))
}
