//! API route handlers
//!
//! - `access`: register, recognize and verify (the engine-backed decisions)
//! - `users`: identity listing and metadata edits
//! - `logs`: audit log listing and bulk clear
//! - `system`: health and effective configuration

pub mod access;
pub mod logs;
pub mod system;
pub mod users;

use crate::error::ApiError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::io::Cursor;

/// Decode a base64 image (optionally a `data:` URL) and make sure it is an
/// image the extractor can read.
pub(crate) fn decode_image(field: &str, encoded: &str) -> Result<Vec<u8>, ApiError> {
    let payload = match encoded.split_once(',') {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| ApiError::BadRequest(format!("{field}: invalid base64 ({e})")))?;
    ensure_image(field, &bytes)?;
    Ok(bytes)
}

/// Reject bytes that do not carry a recognizable image header.
pub(crate) fn ensure_image(field: &str, bytes: &[u8]) -> Result<(), ApiError> {
    if bytes.is_empty() {
        return Err(ApiError::BadRequest(format!("{field}: image is empty")));
    }
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ApiError::BadRequest(format!("{field}: unreadable image ({e})")))?
        .into_dimensions()
        .map_err(|e| ApiError::BadRequest(format!("{field}: invalid image data ({e})")))?;
    Ok(())
}

/// Required string field, trimmed.
pub(crate) fn required(field: &str, value: Option<String>) -> Result<String, ApiError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("missing required field: {field}")))
}

/// 404 for undefined routes.
pub async fn not_found() -> ApiError {
    ApiError::NotFound("no such endpoint".into())
}
