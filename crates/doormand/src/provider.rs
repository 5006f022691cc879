//! HTTP client for the external embedding extractor.

use doorman_core::provider::single_face;
use doorman_core::{Embedding, EmbeddingProvider, ExtractionError};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct RepresentResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    faces: Vec<FaceEmbedding>,
}

#[derive(Debug, Deserialize)]
struct FaceEmbedding {
    embedding: Vec<f32>,
}

/// Posts raw image bytes to an extractor service and reads back one
/// embedding per detected face.
///
/// Uses a blocking client: call it from the engine thread only.
pub struct RemoteEmbeddingProvider {
    client: reqwest::blocking::Client,
    url: String,
    model: String,
}

impl RemoteEmbeddingProvider {
    pub fn new(url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("doormand/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            model: model.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl EmbeddingProvider for RemoteEmbeddingProvider {
    fn extract(&self, image: &[u8]) -> Result<Embedding, ExtractionError> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(image.to_vec())
            .send()
            .map_err(|e| ExtractionError::ExtractionFailed(format!("extractor unreachable: {e}")))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .map_err(|e| ExtractionError::ExtractionFailed(format!("reading extractor response: {e}")))?;
        tracing::debug!(status, bytes = body.len(), "extractor responded");

        decode_response(status, &body, &self.model)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Interpret an extractor reply.
fn decode_response(status: u16, body: &[u8], expected_model: &str) -> Result<Embedding, ExtractionError> {
    if status == 422 {
        return Err(ExtractionError::NoFaceDetected);
    }
    if !(200..300).contains(&status) {
        return Err(ExtractionError::ExtractionFailed(format!("extractor returned HTTP {status}")));
    }

    let parsed: RepresentResponse = serde_json::from_slice(body)
        .map_err(|e| ExtractionError::ExtractionFailed(format!("unreadable extractor response: {e}")))?;

    if let Some(model) = parsed.model.as_deref() {
        if model != expected_model {
            return Err(ExtractionError::ExtractionFailed(format!(
                "extractor model '{model}' does not match configured '{expected_model}'"
            )));
        }
    }

    single_face(parsed.faces.into_iter().map(|f| f.embedding).collect())
}
