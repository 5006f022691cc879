use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;
use doorman_core::{AuditEntry, AuditOrder};
use serde::{Deserialize, Serialize};

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 1000;

#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
    pub order: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogsResponse {
    pub success: bool,
    pub logs: Vec<AuditEntry>,
    pub count: usize,
    pub order: AuditOrder,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClearResponse {
    pub success: bool,
    pub message: String,
    pub removed: usize,
}

/// Most recent audit records, newest first unless `order=insertion`.
pub async fn list_logs(
    State(state): State<AppState>,
    query: Result<Query<LogsQuery>, QueryRejection>,
) -> ApiResult<Json<LogsResponse>> {
    let Query(query) = query?;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let order = match query.order.as_deref() {
        None => AuditOrder::default(),
        Some(raw) => raw.parse::<AuditOrder>().map_err(ApiError::BadRequest)?,
    };

    let logs = state.engine.list_logs(limit, order).await?;
    Ok(Json(LogsResponse {
        success: true,
        count: logs.len(),
        logs,
        order,
    }))
}

pub async fn clear_logs(State(state): State<AppState>) -> ApiResult<Json<ClearResponse>> {
    let removed = state.engine.clear_logs().await?;
    tracing::info!(removed, "audit log cleared via API");
    Ok(Json(ClearResponse {
        success: true,
        message: format!("Cleared {removed} access log entries"),
        removed,
    }))
}
