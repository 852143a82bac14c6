use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, put},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_sessions::Session;
use utoipa::ToSchema;

use crate::error::ApiResult;
use crate::server::AppState;
use crate::user::{self, Role, UserInfo, UserUpdate};

use super::require_user;

#[utoipa::path(get, path = "/api/users")]
pub async fn list_users(
    State(state): State<AppState>,
    session: Session,
) -> ApiResult<Json<Vec<UserInfo>>> {
    let user = require_user(&session, &state.db).await?;
    user.role.authorize(&[])?;
    Ok(Json(user::list_users(&state.db).await?))
}

/// Mentors use this to pick students to assign; admins see it too.
#[utoipa::path(get, path = "/api/users/students")]
pub async fn list_students(
    State(state): State<AppState>,
    session: Session,
) -> ApiResult<Json<Vec<UserInfo>>> {
    let user = require_user(&session, &state.db).await?;
    user.role.authorize(&[Role::Mentor])?;
    Ok(Json(user::list_students(&state.db).await?))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub is_approved: bool,
}

#[utoipa::path(put, path = "/api/users/{id}/approve-mentor", request_body = ApprovalRequest)]
pub async fn approve_mentor(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<i64>,
    Json(req): Json<ApprovalRequest>,
) -> ApiResult<Json<UserInfo>> {
    let user = require_user(&session, &state.db).await?;
    user.role.authorize(&[])?;
    Ok(Json(
        user::approve_mentor(&state.db, id, req.is_approved).await?,
    ))
}

#[utoipa::path(put, path = "/api/users/{id}", request_body = UserUpdate)]
pub async fn update_user(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<i64>,
    Json(update): Json<UserUpdate>,
) -> ApiResult<Json<UserInfo>> {
    let user = require_user(&session, &state.db).await?;
    user.role.authorize(&[])?;
    Ok(Json(user::update_user(&state.db, &user, id, update).await?))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActivationRequest {
    pub is_active: bool,
}

#[utoipa::path(put, path = "/api/users/{id}/activate", request_body = ActivationRequest)]
pub async fn set_user_active(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<i64>,
    Json(req): Json<ActivationRequest>,
) -> ApiResult<Json<UserInfo>> {
    let user = require_user(&session, &state.db).await?;
    user.role.authorize(&[])?;
    Ok(Json(
        user::set_user_active(&state.db, &user, id, req.is_active).await?,
    ))
}

#[utoipa::path(delete, path = "/api/users/{id}")]
pub async fn delete_user(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let user = require_user(&session, &state.db).await?;
    user.role.authorize(&[])?;
    user::delete_user(&state.db, &user, id).await?;
    Ok(Json(json!({ "message": "User deleted successfully" })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/students", get(list_students))
        .route("/users/{id}", put(update_user).delete(delete_user))
        .route("/users/{id}/approve-mentor", put(approve_mentor))
        .route("/users/{id}/activate", put(set_user_active))
}
