use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use doorman_core::{ConfidenceModel, DistanceMetric};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Liveness check. Does not touch the engine.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "model": state.config.provider_model,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigResponse {
    pub success: bool,
    pub model: String,
    pub metric: DistanceMetric,
    pub recognition_threshold: f32,
    pub registration_threshold: f32,
    pub confidence_policy: ConfidenceModel,
    pub min_confidence: Option<f32>,
    pub embedding_dim: Option<usize>,
}

/// Effective matching configuration.
pub async fn config(State(state): State<AppState>) -> Json<ConfigResponse> {
    let config = &state.config;
    Json(ConfigResponse {
        success: true,
        model: config.provider_model.clone(),
        metric: config.metric,
        recognition_threshold: config.recognition_threshold,
        registration_threshold: config.registration_threshold,
        confidence_policy: config.confidence_policy,
        min_confidence: config.min_confidence,
        embedding_dim: config.embedding_dim,
    })
}
