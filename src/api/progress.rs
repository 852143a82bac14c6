use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Deserialize;
use tower_sessions::Session;
use utoipa::IntoParams;

use crate::course;
use crate::error::ApiResult;
use crate::progress::{
    self, CourseStatus, CourseStudentsReport, MyCourseProgress, ProgressRecord,
};
use crate::server::AppState;
use crate::user::Role;

use super::require_user;

#[utoipa::path(post, path = "/api/progress/{chapter_id}/complete")]
pub async fn complete_chapter(
    State(state): State<AppState>,
    session: Session,
    Path(chapter_id): Path<i64>,
) -> ApiResult<(StatusCode, Json<ProgressRecord>)> {
    let user = require_user(&session, &state.db).await?;
    user.role.authorize(&[Role::Student])?;
    let record = progress::complete(&state.db, user.id, chapter_id).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct StatusQuery {
    /// Mentor/admin only: inspect this student instead of the caller.
    pub student_id: Option<i64>,
}

/// Chapter statuses with lock/complete flags plus the completion summary.
/// Students get the locked view of their own progress; mentors and admins see
/// everything unlocked and may pass `studentId` to inspect one learner.
#[utoipa::path(get, path = "/api/progress/course/{course_id}", params(StatusQuery))]
pub async fn course_status(
    State(state): State<AppState>,
    session: Session,
    Path(course_id): Path<i64>,
    Query(q): Query<StatusQuery>,
) -> ApiResult<Json<CourseStatus>> {
    let user = require_user(&session, &state.db).await?;
    let course = course::get_course(&state.db, course_id).await?;
    course::ensure_can_view(&state.db, &course, &user).await?;
    let (student_id, lock_view) = match user.role {
        Role::Student => (user.id, true),
        Role::Mentor | Role::Admin => (q.student_id.unwrap_or(user.id), false),
    };
    Ok(Json(
        progress::status_for_course(&state.db, student_id, course, lock_view).await?,
    ))
}

#[utoipa::path(get, path = "/api/progress/my")]
pub async fn my_progress(
    State(state): State<AppState>,
    session: Session,
) -> ApiResult<Json<Vec<MyCourseProgress>>> {
    let user = require_user(&session, &state.db).await?;
    user.role.authorize(&[Role::Student])?;
    Ok(Json(progress::my_progress(&state.db, user.id).await?))
}

#[utoipa::path(get, path = "/api/progress/course/{course_id}/students")]
pub async fn course_students(
    State(state): State<AppState>,
    session: Session,
    Path(course_id): Path<i64>,
) -> ApiResult<Json<CourseStudentsReport>> {
    let user = require_user(&session, &state.db).await?;
    let course = course::get_course(&state.db, course_id).await?;
    course::ensure_owner(&course, &user, "view student progress for")?;
    Ok(Json(
        progress::course_students_progress(&state.db, &course).await?,
    ))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/progress/{chapter_id}/complete", post(complete_chapter))
        .route("/progress/course/{course_id}", get(course_status))
        .route("/progress/my", get(my_progress))
        .route(
            "/progress/course/{course_id}/students",
            get(course_students),
        )
}
