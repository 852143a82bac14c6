use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use tower_sessions::Session;

use crate::certificate::{self, IssuedCertificate, VerificationResponse};
use crate::error::ApiResult;
use crate::server::AppState;
use crate::user::Role;

use super::require_user;

/// Issues the certificate on the first eligible call; every later call
/// returns the same record.
#[utoipa::path(get, path = "/api/certificates/{course_id}")]
pub async fn get_certificate(
    State(state): State<AppState>,
    session: Session,
    Path(course_id): Path<i64>,
) -> ApiResult<Json<IssuedCertificate>> {
    let user = require_user(&session, &state.db).await?;
    user.role.authorize(&[Role::Student])?;
    Ok(Json(
        certificate::issue_or_fetch(&state.db, &user, course_id).await?,
    ))
}

/// Public lookup, no session required.
#[utoipa::path(get, path = "/api/certificates/verify/{certificate_number}")]
pub async fn verify_certificate(
    State(state): State<AppState>,
    Path(certificate_number): Path<String>,
) -> ApiResult<Json<VerificationResponse>> {
    Ok(Json(
        certificate::verify(&state.db, &certificate_number).await?,
    ))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/certificates/{course_id}", get(get_certificate))
        .route(
            "/certificates/verify/{certificate_number}",
            get(verify_certificate),
        )
}
