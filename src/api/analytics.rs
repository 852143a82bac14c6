use std::collections::HashMap;

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use tower_sessions::Session;

use crate::analytics::{
    self, MentorActivityReport, PlatformSummary, Snapshot, StudentProgressFilter,
    StudentProgressReport,
};
use crate::error::ApiResult;
use crate::server::AppState;
use crate::user::{self, Role};
use crate::utils::now_utc;

use super::require_user;

#[utoipa::path(get, path = "/api/analytics/summary")]
pub async fn summary(
    State(state): State<AppState>,
    session: Session,
) -> ApiResult<Json<PlatformSummary>> {
    let user = require_user(&session, &state.db).await?;
    user.role.authorize(&[])?;
    let users = user::list_users(&state.db).await?;
    let snap = Snapshot::load(&state.db).await?;
    Ok(Json(analytics::summarize(&users, &snap)))
}

#[utoipa::path(get, path = "/api/analytics/students/progress", params(StudentProgressFilter))]
pub async fn students_progress(
    State(state): State<AppState>,
    session: Session,
    Query(filter): Query<StudentProgressFilter>,
) -> ApiResult<Json<Vec<StudentProgressReport>>> {
    let user = require_user(&session, &state.db).await?;
    user.role.authorize(&[])?;
    let users = user::list_users(&state.db).await?;
    let snap = Snapshot::load(&state.db).await?;
    let students: Vec<_> = users
        .iter()
        .filter(|u| u.role == Role::Student)
        .cloned()
        .collect();
    let mentor_names: HashMap<i64, String> =
        users.iter().map(|u| (u.id, u.name.clone())).collect();
    Ok(Json(analytics::student_progress_report(
        &students,
        &mentor_names,
        &snap,
        &filter,
    )))
}

#[utoipa::path(get, path = "/api/analytics/mentors/activity")]
pub async fn mentors_activity(
    State(state): State<AppState>,
    session: Session,
) -> ApiResult<Json<Vec<MentorActivityReport>>> {
    let user = require_user(&session, &state.db).await?;
    user.role.authorize(&[])?;
    let mentors = user::list_mentors(&state.db).await?;
    let snap = Snapshot::load(&state.db).await?;
    Ok(Json(analytics::mentor_activity_report(
        &mentors,
        &snap,
        now_utc(),
    )))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/analytics/summary", get(summary))
        .route("/analytics/students/progress", get(students_progress))
        .route("/analytics/mentors/activity", get(mentors_activity))
}
