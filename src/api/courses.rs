use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post, put},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_sessions::Session;
use utoipa::ToSchema;

use crate::course::{self, Course, CourseDetail, CourseUpdate};
use crate::error::ApiResult;
use crate::server::AppState;
use crate::user::Role;

use super::require_user;

#[derive(Debug, Deserialize, ToSchema)]
pub struct NewCourse {
    pub title: String,
    pub description: String,
}

#[utoipa::path(post, path = "/api/courses", request_body = NewCourse)]
pub async fn create_course(
    State(state): State<AppState>,
    session: Session,
    Json(req): Json<NewCourse>,
) -> ApiResult<Json<Course>> {
    let user = require_user(&session, &state.db).await?;
    user.role.authorize(&[Role::Mentor])?;
    Ok(Json(
        course::create_course(&state.db, user.id, req.title, req.description).await?,
    ))
}

/// Own courses for mentors, assigned courses for students, all for admins.
#[utoipa::path(get, path = "/api/courses/my")]
pub async fn my_courses(
    State(state): State<AppState>,
    session: Session,
) -> ApiResult<Json<Vec<CourseDetail>>> {
    let user = require_user(&session, &state.db).await?;
    Ok(Json(course::list_for(&state.db, &user).await?))
}

#[utoipa::path(get, path = "/api/courses/{id}")]
pub async fn get_course(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<i64>,
) -> ApiResult<Json<CourseDetail>> {
    let user = require_user(&session, &state.db).await?;
    let course = course::get_course(&state.db, id).await?;
    course::ensure_can_view(&state.db, &course, &user).await?;
    Ok(Json(course::course_detail(&state.db, course).await?))
}

#[utoipa::path(put, path = "/api/courses/{id}", request_body = CourseUpdate)]
pub async fn update_course(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<i64>,
    Json(update): Json<CourseUpdate>,
) -> ApiResult<Json<Course>> {
    let user = require_user(&session, &state.db).await?;
    Ok(Json(
        course::update_course(&state.db, &user, id, update).await?,
    ))
}

#[utoipa::path(delete, path = "/api/courses/{id}")]
pub async fn delete_course(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let user = require_user(&session, &state.db).await?;
    course::delete_course(&state.db, &user, id).await?;
    Ok(Json(
        json!({ "message": "Course and all related data deleted successfully" }),
    ))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    pub student_ids: Vec<i64>,
}

#[utoipa::path(post, path = "/api/courses/{id}/assign", request_body = AssignRequest)]
pub async fn assign_students(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<i64>,
    Json(req): Json<AssignRequest>,
) -> ApiResult<Json<CourseDetail>> {
    let user = require_user(&session, &state.db).await?;
    user.role.authorize(&[Role::Mentor])?;
    Ok(Json(
        course::assign_students(&state.db, &user, id, &req.student_ids).await?,
    ))
}

/// Wholesale roster replacement; an empty list clears the course.
#[utoipa::path(put, path = "/api/courses/{id}/assign", request_body = AssignRequest)]
pub async fn reassign_students(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<i64>,
    Json(req): Json<AssignRequest>,
) -> ApiResult<Json<CourseDetail>> {
    let user = require_user(&session, &state.db).await?;
    user.role.authorize(&[])?;
    Ok(Json(
        course::reassign_students(&state.db, id, &req.student_ids).await?,
    ))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CourseActivationRequest {
    pub is_active: bool,
}

#[utoipa::path(put, path = "/api/courses/{id}/activate", request_body = CourseActivationRequest)]
pub async fn set_course_active(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<i64>,
    Json(req): Json<CourseActivationRequest>,
) -> ApiResult<Json<Course>> {
    let user = require_user(&session, &state.db).await?;
    user.role.authorize(&[])?;
    Ok(Json(
        course::set_course_active(&state.db, id, req.is_active).await?,
    ))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/courses", post(create_course))
        .route("/courses/my", get(my_courses))
        .route(
            "/courses/{id}",
            get(get_course).put(update_course).delete(delete_course),
        )
        .route(
            "/courses/{id}/assign",
            post(assign_students).put(reassign_students),
        )
        .route("/courses/{id}/activate", put(set_course_active))
}
