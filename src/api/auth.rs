use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_sessions::Session;
use utoipa::ToSchema;

use crate::error::ApiResult;
use crate::server::AppState;
use crate::user::{self, Role, UserInfo};

use super::{SESSION_USER_KEY, require_user, session_error};

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[utoipa::path(post, path = "/api/auth/register", request_body = RegisterRequest)]
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<Json<UserInfo>> {
    let user =
        user::create_user(&state.db, req.name, req.email, req.password, Role::Student).await?;
    Ok(Json(user))
}

/// Mentor accounts go live only after an admin approves them.
#[utoipa::path(post, path = "/api/auth/register-mentor", request_body = RegisterRequest)]
pub async fn register_mentor(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<Json<UserInfo>> {
    let user =
        user::create_user(&state.db, req.name, req.email, req.password, Role::Mentor).await?;
    Ok(Json(user))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[utoipa::path(post, path = "/api/auth/login", request_body = LoginRequest)]
pub async fn login(
    State(state): State<AppState>,
    session: Session,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<UserInfo>> {
    let user = user::login(&state.db, req.email, req.password).await?;
    session
        .insert(SESSION_USER_KEY, user.id)
        .await
        .map_err(session_error)?;
    Ok(Json(user))
}

#[utoipa::path(post, path = "/api/auth/logout")]
pub async fn logout(session: Session) -> ApiResult<Json<Value>> {
    session.flush().await.map_err(session_error)?;
    Ok(Json(json!({ "message": "Logout successful" })))
}

#[utoipa::path(get, path = "/api/auth/me")]
pub async fn me(State(state): State<AppState>, session: Session) -> ApiResult<Json<UserInfo>> {
    let user = require_user(&session, &state.db).await?;
    Ok(Json(user))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/register-mentor", post(register_mentor))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
}
