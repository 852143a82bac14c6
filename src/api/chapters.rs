use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_sessions::Session;

use crate::chapter::{self, Chapter, ChapterUpdate, NewChapter};
use crate::course;
use crate::error::ApiResult;
use crate::server::AppState;

use super::require_user;

#[utoipa::path(post, path = "/api/courses/{course_id}/chapters", request_body = NewChapter)]
pub async fn create_chapter(
    State(state): State<AppState>,
    session: Session,
    Path(course_id): Path<i64>,
    Json(new): Json<NewChapter>,
) -> ApiResult<Json<Chapter>> {
    let user = require_user(&session, &state.db).await?;
    Ok(Json(
        chapter::create_chapter(&state.db, &user, course_id, new).await?,
    ))
}

#[utoipa::path(get, path = "/api/courses/{course_id}/chapters")]
pub async fn list_chapters(
    State(state): State<AppState>,
    session: Session,
    Path(course_id): Path<i64>,
) -> ApiResult<Json<Vec<Chapter>>> {
    let user = require_user(&session, &state.db).await?;
    let course = course::get_course(&state.db, course_id).await?;
    course::ensure_can_view(&state.db, &course, &user).await?;
    Ok(Json(chapter::list_chapters(&state.db, course_id).await?))
}

/// Access follows the parent course: enrolled student, owning mentor, admin.
#[utoipa::path(get, path = "/api/chapters/{id}")]
pub async fn get_chapter(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<i64>,
) -> ApiResult<Json<Chapter>> {
    let user = require_user(&session, &state.db).await?;
    let chapter = chapter::get_chapter(&state.db, id).await?;
    let course = course::get_course(&state.db, chapter.course_id).await?;
    course::ensure_can_view(&state.db, &course, &user).await?;
    Ok(Json(chapter))
}

#[utoipa::path(put, path = "/api/chapters/{id}", request_body = ChapterUpdate)]
pub async fn update_chapter(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<i64>,
    Json(update): Json<ChapterUpdate>,
) -> ApiResult<Json<Chapter>> {
    let user = require_user(&session, &state.db).await?;
    Ok(Json(
        chapter::update_chapter(&state.db, &user, id, update).await?,
    ))
}

#[utoipa::path(delete, path = "/api/chapters/{id}")]
pub async fn delete_chapter(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let user = require_user(&session, &state.db).await?;
    chapter::delete_chapter(&state.db, &user, id).await?;
    Ok(Json(json!({ "message": "Chapter deleted successfully" })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/courses/{course_id}/chapters",
            post(create_chapter).get(list_chapters),
        )
        .route(
            "/chapters/{id}",
            get(get_chapter).put(update_chapter).delete(delete_chapter),
        )
}
