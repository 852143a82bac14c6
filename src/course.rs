use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::error::{ApiError, ApiResult};
use crate::user::{PersonRef, Role, UserInfo};
use crate::utils::now_utc;

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub mentor_id: i64,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Course with its owner and roster embedded, the shape the API returns.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CourseDetail {
    #[serde(flatten)]
    pub course: Course,
    pub mentor: Option<PersonRef>,
    pub assigned_students: Vec<PersonRef>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CourseUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
}

pub async fn get_course(db: &SqlitePool, id: i64) -> ApiResult<Course> {
    sqlx::query_as::<_, Course>("SELECT * FROM course WHERE id = ?1")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Course not found"))
}

/// The mentor owning the course, or an admin. `action` names the denied
/// operation in the error message.
pub fn ensure_owner(course: &Course, user: &UserInfo, action: &str) -> ApiResult<()> {
    if user.role == Role::Admin || course.mentor_id == user.id {
        Ok(())
    } else {
        Err(ApiError::forbidden(format!(
            "Not authorized to {action} this course"
        )))
    }
}

/// View access: enrolled student, owning mentor, or admin.
pub async fn ensure_can_view(db: &SqlitePool, course: &Course, user: &UserInfo) -> ApiResult<()> {
    match user.role {
        Role::Admin => Ok(()),
        Role::Mentor => {
            if course.mentor_id == user.id {
                Ok(())
            } else {
                Err(ApiError::forbidden("Access denied. Not your course"))
            }
        }
        Role::Student => {
            if is_enrolled(db, course.id, user.id).await? {
                Ok(())
            } else {
                Err(ApiError::forbidden("Access denied. Course not assigned to you"))
            }
        }
    }
}

pub async fn is_enrolled(db: &SqlitePool, course_id: i64, student_id: i64) -> ApiResult<bool> {
    let row = sqlx::query_scalar::<_, i64>(
        "SELECT 1 FROM course_student WHERE course_id = ?1 AND student_id = ?2",
    )
    .bind(course_id)
    .bind(student_id)
    .fetch_optional(db)
    .await?;
    Ok(row.is_some())
}

pub async fn roster(db: &SqlitePool, course_id: i64) -> ApiResult<Vec<PersonRef>> {
    Ok(sqlx::query_as::<_, PersonRef>(
        "SELECT u.id, u.name, u.email FROM user u
         JOIN course_student cs ON cs.student_id = u.id
         WHERE cs.course_id = ?1 ORDER BY u.id",
    )
    .bind(course_id)
    .fetch_all(db)
    .await?)
}

async fn mentor_ref(db: &SqlitePool, mentor_id: i64) -> ApiResult<Option<PersonRef>> {
    Ok(
        sqlx::query_as::<_, PersonRef>("SELECT id, name, email FROM user WHERE id = ?1")
            .bind(mentor_id)
            .fetch_optional(db)
            .await?,
    )
}

pub async fn course_detail(db: &SqlitePool, course: Course) -> ApiResult<CourseDetail> {
    let mentor = mentor_ref(db, course.mentor_id).await?;
    let assigned_students = roster(db, course.id).await?;
    Ok(CourseDetail {
        course,
        mentor,
        assigned_students,
    })
}

pub async fn create_course(
    db: &SqlitePool,
    mentor_id: i64,
    title: String,
    description: String,
) -> ApiResult<Course> {
    if title.trim().is_empty() || description.trim().is_empty() {
        return Err(ApiError::denied("Title and description are required"));
    }
    let now = now_utc();
    let id = sqlx::query(
        "INSERT INTO course (title, description, mentor_id, is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, 1, ?4, ?4)",
    )
    .bind(title.trim())
    .bind(description.trim())
    .bind(mentor_id)
    .bind(now)
    .execute(db)
    .await?
    .last_insert_rowid();
    get_course(db, id).await
}

/// Courses visible to the caller: own for mentors, assigned for students,
/// everything for admins. Newest first.
pub async fn list_for(db: &SqlitePool, user: &UserInfo) -> ApiResult<Vec<CourseDetail>> {
    let courses = match user.role {
        Role::Mentor => {
            sqlx::query_as::<_, Course>(
                "SELECT * FROM course WHERE mentor_id = ?1 ORDER BY created_at DESC, id DESC",
            )
            .bind(user.id)
            .fetch_all(db)
            .await?
        }
        Role::Student => {
            sqlx::query_as::<_, Course>(
                "SELECT c.* FROM course c
                 JOIN course_student cs ON cs.course_id = c.id
                 WHERE cs.student_id = ?1 ORDER BY c.created_at DESC, c.id DESC",
            )
            .bind(user.id)
            .fetch_all(db)
            .await?
        }
        Role::Admin => {
            sqlx::query_as::<_, Course>("SELECT * FROM course ORDER BY created_at DESC, id DESC")
                .fetch_all(db)
                .await?
        }
    };
    let mut details = Vec::with_capacity(courses.len());
    for course in courses {
        details.push(course_detail(db, course).await?);
    }
    Ok(details)
}

async fn touch(db: &SqlitePool, course_id: i64) -> ApiResult<()> {
    sqlx::query("UPDATE course SET updated_at = ?1 WHERE id = ?2")
        .bind(now_utc())
        .bind(course_id)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn update_course(
    db: &SqlitePool,
    user: &UserInfo,
    id: i64,
    update: CourseUpdate,
) -> ApiResult<Course> {
    let course = get_course(db, id).await?;
    ensure_owner(&course, user, "update")?;
    if let Some(title) = &update.title {
        sqlx::query("UPDATE course SET title = ?1 WHERE id = ?2")
            .bind(title)
            .bind(id)
            .execute(db)
            .await?;
    }
    if let Some(description) = &update.description {
        sqlx::query("UPDATE course SET description = ?1 WHERE id = ?2")
            .bind(description)
            .bind(id)
            .execute(db)
            .await?;
    }
    touch(db, id).await?;
    get_course(db, id).await
}

/// Deletes the course together with its chapters and progress rows in one
/// transaction, so no request ever sees a chapter without its course or a
/// progress row without its chapter.
pub async fn delete_course(db: &SqlitePool, user: &UserInfo, id: i64) -> ApiResult<()> {
    let course = get_course(db, id).await?;
    ensure_owner(&course, user, "delete")?;
    let mut tx = db.begin().await?;
    sqlx::query("DELETE FROM chapter_progress WHERE course_id = ?1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM chapter WHERE course_id = ?1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM course_student WHERE course_id = ?1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM course WHERE id = ?1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Every id must name an active student; duplicates count as invalid input.
async fn validate_students(db: &SqlitePool, student_ids: &[i64]) -> ApiResult<()> {
    let mut unique = student_ids.to_vec();
    unique.sort_unstable();
    unique.dedup();
    if unique.len() != student_ids.len() {
        return Err(ApiError::denied("Some student IDs are invalid or inactive"));
    }
    let placeholders = (1..=unique.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT COUNT(*) FROM user WHERE role = 'student' AND is_active = 1 AND id IN ({placeholders})"
    );
    let mut query = sqlx::query_scalar::<_, i64>(&sql);
    for id in &unique {
        query = query.bind(id);
    }
    let found = query.fetch_one(db).await?;
    if found as usize != unique.len() {
        return Err(ApiError::denied("Some student IDs are invalid or inactive"));
    }
    Ok(())
}

/// Adds students to the roster, keeping existing assignments.
pub async fn assign_students(
    db: &SqlitePool,
    user: &UserInfo,
    course_id: i64,
    student_ids: &[i64],
) -> ApiResult<CourseDetail> {
    if student_ids.is_empty() {
        return Err(ApiError::denied("Please provide an array of student IDs"));
    }
    let course = get_course(db, course_id).await?;
    ensure_owner(&course, user, "assign")?;
    validate_students(db, student_ids).await?;
    let mut tx = db.begin().await?;
    for id in student_ids {
        sqlx::query(
            "INSERT OR IGNORE INTO course_student (course_id, student_id) VALUES (?1, ?2)",
        )
        .bind(course_id)
        .bind(id)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    touch(db, course_id).await?;
    course_detail(db, get_course(db, course_id).await?).await
}

/// Replaces the roster wholesale; an empty list clears it. Admin only.
pub async fn reassign_students(
    db: &SqlitePool,
    course_id: i64,
    student_ids: &[i64],
) -> ApiResult<CourseDetail> {
    get_course(db, course_id).await?;
    if !student_ids.is_empty() {
        validate_students(db, student_ids).await?;
    }
    let mut tx = db.begin().await?;
    sqlx::query("DELETE FROM course_student WHERE course_id = ?1")
        .bind(course_id)
        .execute(&mut *tx)
        .await?;
    for id in student_ids {
        sqlx::query("INSERT INTO course_student (course_id, student_id) VALUES (?1, ?2)")
            .bind(course_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    touch(db, course_id).await?;
    course_detail(db, get_course(db, course_id).await?).await
}

pub async fn set_course_active(db: &SqlitePool, id: i64, is_active: bool) -> ApiResult<Course> {
    get_course(db, id).await?;
    sqlx::query("UPDATE course SET is_active = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(is_active)
        .bind(now_utc())
        .bind(id)
        .execute(db)
        .await?;
    get_course(db, id).await
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::user::{self, Role};

    pub async fn student(db: &SqlitePool, name: &str) -> UserInfo {
        user::create_user(
            db,
            name.to_string(),
            format!("{}@example.com", name.to_lowercase().replace(' ', ".")),
            "secret".to_string(),
            Role::Student,
        )
        .await
        .unwrap()
    }

    pub async fn approved_mentor(db: &SqlitePool, name: &str) -> UserInfo {
        let mentor = user::create_user(
            db,
            name.to_string(),
            format!("{}@example.com", name.to_lowercase().replace(' ', ".")),
            "secret".to_string(),
            Role::Mentor,
        )
        .await
        .unwrap();
        user::approve_mentor(db, mentor.id, true).await.unwrap()
    }

    pub async fn course_with(db: &SqlitePool, mentor: &UserInfo, students: &[&UserInfo]) -> Course {
        let course = create_course(
            db,
            mentor.id,
            format!("Course of {}", mentor.name),
            "A course".to_string(),
        )
        .await
        .unwrap();
        if !students.is_empty() {
            let ids: Vec<i64> = students.iter().map(|s| s.id).collect();
            assign_students(db, mentor, course.id, &ids).await.unwrap();
        }
        get_course(db, course.id).await.unwrap()
    }
}
