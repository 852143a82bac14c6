use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::course::{self, ensure_owner};
use crate::error::{ApiError, ApiResult, is_unique_violation};
use crate::user::UserInfo;
use crate::utils::now_utc;

/// One content unit of a course. `sequence_order` is caller-supplied and
/// unique within the course; it is the only thing that defines
/// previous/next.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: i64,
    pub course_id: i64,
    pub title: String,
    pub description: String,
    pub image: String,
    pub video_link: String,
    pub sequence_order: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewChapter {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub image: Option<String>,
    pub video_link: String,
    pub sequence_order: i64,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChapterUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub video_link: Option<String>,
    pub sequence_order: Option<i64>,
}

const SEQUENCE_TAKEN: &str = "A chapter with this sequence order already exists for this course";

pub async fn get_chapter(db: &SqlitePool, id: i64) -> ApiResult<Chapter> {
    sqlx::query_as::<_, Chapter>("SELECT * FROM chapter WHERE id = ?1")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Chapter not found"))
}

/// All chapters of a course, ascending by sequence order.
pub async fn list_chapters(db: &SqlitePool, course_id: i64) -> ApiResult<Vec<Chapter>> {
    Ok(sqlx::query_as::<_, Chapter>(
        "SELECT * FROM chapter WHERE course_id = ?1 ORDER BY sequence_order ASC",
    )
    .bind(course_id)
    .fetch_all(db)
    .await?)
}

pub async fn create_chapter(
    db: &SqlitePool,
    user: &UserInfo,
    course_id: i64,
    new: NewChapter,
) -> ApiResult<Chapter> {
    if new.title.trim().is_empty()
        || new.description.trim().is_empty()
        || new.video_link.trim().is_empty()
        || new.sequence_order < 1
    {
        return Err(ApiError::denied(
            "Title, description, videoLink, and sequenceOrder are required",
        ));
    }
    let course = course::get_course(db, course_id).await?;
    ensure_owner(&course, user, "add chapters to")?;
    let result = sqlx::query(
        "INSERT INTO chapter (course_id, title, description, image, video_link, sequence_order, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .bind(course_id)
    .bind(new.title.trim())
    .bind(new.description.trim())
    .bind(new.image.unwrap_or_default())
    .bind(new.video_link.trim())
    .bind(new.sequence_order)
    .bind(now_utc())
    .execute(db)
    .await;
    match result {
        Ok(r) => get_chapter(db, r.last_insert_rowid()).await,
        Err(e) if is_unique_violation(&e) => Err(ApiError::denied(SEQUENCE_TAKEN)),
        Err(e) => Err(e.into()),
    }
}

pub async fn update_chapter(
    db: &SqlitePool,
    user: &UserInfo,
    id: i64,
    update: ChapterUpdate,
) -> ApiResult<Chapter> {
    let chapter = get_chapter(db, id).await?;
    let course = course::get_course(db, chapter.course_id).await?;
    ensure_owner(&course, user, "update chapters of")?;
    if let Some(sequence_order) = update.sequence_order {
        if sequence_order < 1 {
            return Err(ApiError::denied(
                "Title, description, videoLink, and sequenceOrder are required",
            ));
        }
        let result = sqlx::query("UPDATE chapter SET sequence_order = ?1 WHERE id = ?2")
            .bind(sequence_order)
            .bind(id)
            .execute(db)
            .await;
        match result {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Err(ApiError::denied(SEQUENCE_TAKEN)),
            Err(e) => return Err(e.into()),
        }
    }
    if let Some(title) = &update.title {
        sqlx::query("UPDATE chapter SET title = ?1 WHERE id = ?2")
            .bind(title)
            .bind(id)
            .execute(db)
            .await?;
    }
    if let Some(description) = &update.description {
        sqlx::query("UPDATE chapter SET description = ?1 WHERE id = ?2")
            .bind(description)
            .bind(id)
            .execute(db)
            .await?;
    }
    if let Some(image) = &update.image {
        sqlx::query("UPDATE chapter SET image = ?1 WHERE id = ?2")
            .bind(image)
            .bind(id)
            .execute(db)
            .await?;
    }
    if let Some(video_link) = &update.video_link {
        sqlx::query("UPDATE chapter SET video_link = ?1 WHERE id = ?2")
            .bind(video_link)
            .bind(id)
            .execute(db)
            .await?;
    }
    get_chapter(db, id).await
}

/// Removes the chapter and any progress rows pointing at it, atomically.
pub async fn delete_chapter(db: &SqlitePool, user: &UserInfo, id: i64) -> ApiResult<()> {
    let chapter = get_chapter(db, id).await?;
    let course = course::get_course(db, chapter.course_id).await?;
    ensure_owner(&course, user, "delete chapters of")?;
    let mut tx = db.begin().await?;
    sqlx::query("DELETE FROM chapter_progress WHERE chapter_id = ?1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM chapter WHERE id = ?1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::course::test_support::{approved_mentor, course_with, student};
    use crate::db::test_pool;
    use test_support::add_chapter;

    #[tokio::test]
    async fn chapters_come_back_in_sequence_order() {
        let db = test_pool().await;
        let mentor = approved_mentor(&db, "Grace").await;
        let course = course_with(&db, &mentor, &[]).await;
        add_chapter(&db, &mentor, course.id, 3).await;
        add_chapter(&db, &mentor, course.id, 1).await;
        add_chapter(&db, &mentor, course.id, 2).await;

        let chapters = list_chapters(&db, course.id).await.unwrap();
        let orders: Vec<i64> = chapters.iter().map(|c| c.sequence_order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn duplicate_sequence_order_is_rejected() {
        let db = test_pool().await;
        let mentor = approved_mentor(&db, "Grace").await;
        let course = course_with(&db, &mentor, &[]).await;
        add_chapter(&db, &mentor, course.id, 1).await;
        let ch2 = add_chapter(&db, &mentor, course.id, 2).await;

        let err = create_chapter(
            &db,
            &mentor,
            course.id,
            NewChapter {
                title: "Clash".into(),
                description: "d".into(),
                image: None,
                video_link: "https://videos.example.com/x".into(),
                sequence_order: 1,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Denied(_)));

        // same collision through the update path
        let err = update_chapter(
            &db,
            &mentor,
            ch2.id,
            ChapterUpdate {
                sequence_order: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Denied(_)));
    }

    #[tokio::test]
    async fn only_the_owner_may_author_chapters() {
        let db = test_pool().await;
        let mentor = approved_mentor(&db, "Grace").await;
        let other = approved_mentor(&db, "Joan").await;
        let course = course_with(&db, &mentor, &[]).await;

        let err = create_chapter(
            &db,
            &other,
            course.id,
            NewChapter {
                title: "Nope".into(),
                description: "d".into(),
                image: None,
                video_link: "https://videos.example.com/x".into(),
                sequence_order: 1,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[tokio::test]
    async fn delete_removes_progress_rows() {
        let db = test_pool().await;
        let mentor = approved_mentor(&db, "Grace").await;
        let alice = student(&db, "Alice").await;
        let course = course_with(&db, &mentor, &[&alice]).await;
        let ch = add_chapter(&db, &mentor, course.id, 1).await;
        crate::progress::complete(&db, alice.id, ch.id).await.unwrap();

        delete_chapter(&db, &mentor, ch.id).await.unwrap();
        let left: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chapter_progress WHERE chapter_id = ?1")
            .bind(ch.id)
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(left, 0);
    }
}
