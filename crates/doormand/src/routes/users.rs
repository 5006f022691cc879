use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use doorman_core::{IdentityPatch, RawIdentityRecord, UNKNOWN_NAME};
use serde::{Deserialize, Serialize};

/// An identity as clients see it. The embedding itself is never returned.
#[derive(Debug, Serialize, Deserialize)]
pub struct UserView {
    pub user_id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: Option<String>,
    pub enrolled_at: Option<String>,
    pub provider_model: Option<String>,
    pub embedding_dim: Option<usize>,
}

impl From<RawIdentityRecord> for UserView {
    fn from(record: RawIdentityRecord) -> Self {
        Self {
            embedding_dim: record.embedding.as_ref().map(Vec::len),
            user_id: record.id,
            name: record.name.unwrap_or_else(|| UNKNOWN_NAME.to_string()),
            email: record.email.filter(|e| !e.is_empty()),
            phone: record.phone.filter(|p| !p.is_empty()),
            status: record.status,
            enrolled_at: record.enrolled_at,
            provider_model: record.provider_model,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UsersResponse {
    pub success: bool,
    pub users: Vec<UserView>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub success: bool,
    pub user: UserView,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserChangeResponse {
    pub success: bool,
    pub message: String,
    pub user: UserView,
}

/// All identities, active and inactive.
pub async fn list_users(State(state): State<AppState>) -> ApiResult<Json<UsersResponse>> {
    let users: Vec<UserView> = state
        .engine
        .list_identities()
        .await?
        .into_iter()
        .map(UserView::from)
        .collect();
    Ok(Json(UsersResponse {
        success: true,
        count: users.len(),
        users,
    }))
}

pub async fn get_user(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<UserResponse>> {
    let record = state.engine.get_identity(id).await?;
    Ok(Json(UserResponse {
        success: true,
        user: record.into(),
    }))
}

/// Edit name, email, phone or status. The embedding cannot be changed.
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<IdentityPatch>, JsonRejection>,
) -> ApiResult<Json<UserChangeResponse>> {
    let Json(patch) = payload?;
    if patch.is_empty() {
        return Err(ApiError::BadRequest("no fields to update".into()));
    }
    let record = state.engine.update_identity(id, patch).await?;
    Ok(Json(UserChangeResponse {
        success: true,
        message: "User updated successfully".into(),
        user: record.into(),
    }))
}

/// Hard delete. Audit history for the identity is kept.
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<UserChangeResponse>> {
    let record = state.engine.remove_identity(id).await?;
    let user = UserView::from(record);
    Ok(Json(UserChangeResponse {
        success: true,
        message: format!("User {} deleted successfully", user.name),
        user,
    }))
}
