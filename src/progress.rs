use std::collections::HashSet;

use serde::Serialize;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::chapter::{self, Chapter};
use crate::course::{self, Course};
use crate::error::{ApiError, ApiResult, is_unique_violation};
use crate::utils::now_utc;

pub const ALREADY_COMPLETED: &str = "Chapter already completed";
pub const OUT_OF_SEQUENCE: &str =
    "You must complete previous chapters in sequence before completing this chapter";
pub const NOT_ENROLLED: &str = "You are not enrolled in this course";

/// One completed chapter for one student. The existence of a row is the sole
/// source of truth for "completed"; the `(student_id, chapter_id)` UNIQUE
/// constraint keeps it single.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub id: i64,
    pub student_id: i64,
    pub course_id: i64,
    pub chapter_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChapterStatus {
    #[serde(flatten)]
    pub chapter: Chapter,
    pub is_completed: bool,
    pub is_locked: bool,
}

#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CourseProgress {
    pub total_chapters: i64,
    pub completed_chapters: i64,
    pub completion_percentage: i64,
}

/// Rounded integer percentage; a course without chapters counts as 0.
pub fn completion_percentage(completed: i64, total: i64) -> i64 {
    if total <= 0 {
        0
    } else {
        ((completed as f64 / total as f64) * 100.0).round() as i64
    }
}

pub fn is_fully_complete(completed: i64, total: i64) -> bool {
    total > 0 && completed >= total
}

/// Lock/complete state of every chapter for the status view.
///
/// The lock here looks only at the immediate predecessor: the first chapter
/// is never locked, chapter `i` is locked iff chapter `i - 1` is incomplete.
/// The write path ([`can_complete`]) checks the whole prefix instead; the two
/// rules are intentionally separate. With `lock_view` false (mentor/admin
/// views) nothing is locked.
pub fn chapter_statuses(
    chapters: Vec<Chapter>,
    completed: &HashSet<i64>,
    lock_view: bool,
) -> Vec<ChapterStatus> {
    let mut statuses = Vec::with_capacity(chapters.len());
    for i in 0..chapters.len() {
        let is_locked = lock_view && i > 0 && !completed.contains(&chapters[i - 1].id);
        let chapter = chapters[i].clone();
        statuses.push(ChapterStatus {
            is_completed: completed.contains(&chapter.id),
            is_locked,
            chapter,
        });
    }
    statuses
}

/// Ids of the chapters the student has completed in a course.
pub async fn completed_chapter_ids(
    db: &SqlitePool,
    student_id: i64,
    course_id: i64,
) -> ApiResult<HashSet<i64>> {
    let ids = sqlx::query_scalar::<_, i64>(
        "SELECT chapter_id FROM chapter_progress WHERE student_id = ?1 AND course_id = ?2",
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_all(db)
    .await?;
    Ok(ids.into_iter().collect())
}

/// Decide whether the student may complete the chapter, in order: the
/// chapter must exist, the student must be enrolled, the chapter must not
/// already be completed, and every chapter earlier in the sequence must be.
/// Returns the chapter so the caller does not re-fetch it.
pub async fn can_complete(
    db: &SqlitePool,
    student_id: i64,
    chapter_id: i64,
) -> ApiResult<Chapter> {
    let chapter = chapter::get_chapter(db, chapter_id).await?;
    if !course::is_enrolled(db, chapter.course_id, student_id).await? {
        return Err(ApiError::forbidden(NOT_ENROLLED));
    }
    let existing = sqlx::query_scalar::<_, i64>(
        "SELECT 1 FROM chapter_progress WHERE student_id = ?1 AND chapter_id = ?2",
    )
    .bind(student_id)
    .bind(chapter_id)
    .fetch_optional(db)
    .await?;
    if existing.is_some() {
        return Err(ApiError::denied(ALREADY_COMPLETED));
    }

    let all_chapters = chapter::list_chapters(db, chapter.course_id).await?;
    let index = all_chapters
        .iter()
        .position(|c| c.id == chapter_id)
        .ok_or_else(|| anyhow::anyhow!("chapter {chapter_id} missing from its own course"))?;
    if index > 0 {
        let completed = completed_chapter_ids(db, student_id, chapter.course_id).await?;
        let completed_previous = all_chapters[..index]
            .iter()
            .filter(|c| completed.contains(&c.id))
            .count();
        if completed_previous != index {
            return Err(ApiError::denied(OUT_OF_SEQUENCE));
        }
    }
    Ok(chapter)
}

/// Insert the single progress row; a racing duplicate insert trips the
/// UNIQUE constraint and comes back as the same denial the pre-check gives,
/// so a client cannot tell a lost race from an ordinary re-submit.
async fn insert_record(
    db: &SqlitePool,
    student_id: i64,
    course_id: i64,
    chapter_id: i64,
) -> ApiResult<ProgressRecord> {
    let result = sqlx::query(
        "INSERT INTO chapter_progress (student_id, course_id, chapter_id, completed_at)
         VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(student_id)
    .bind(course_id)
    .bind(chapter_id)
    .bind(now_utc())
    .execute(db)
    .await;
    let id = match result {
        Ok(r) => r.last_insert_rowid(),
        Err(e) if is_unique_violation(&e) => return Err(ApiError::denied(ALREADY_COMPLETED)),
        Err(e) => return Err(e.into()),
    };
    Ok(sqlx::query_as::<_, ProgressRecord>(
        "SELECT * FROM chapter_progress WHERE id = ?1",
    )
    .bind(id)
    .fetch_one(db)
    .await?)
}

/// Mark the chapter complete for the student, enforcing the sequence rule.
pub async fn complete(
    db: &SqlitePool,
    student_id: i64,
    chapter_id: i64,
) -> ApiResult<ProgressRecord> {
    let chapter = can_complete(db, student_id, chapter_id).await?;
    insert_record(db, student_id, chapter.course_id, chapter_id).await
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CourseStatus {
    pub course: Course,
    pub chapters: Vec<ChapterStatus>,
    pub progress: CourseProgress,
}

/// Chapter-by-chapter view of a course for one student. `lock_view` is on
/// for students and off for mentor/admin inspection.
pub async fn status_for_course(
    db: &SqlitePool,
    student_id: i64,
    course: Course,
    lock_view: bool,
) -> ApiResult<CourseStatus> {
    let (chapters, completed) = tokio::try_join!(
        chapter::list_chapters(db, course.id),
        completed_chapter_ids(db, student_id, course.id),
    )?;
    let total = chapters.len() as i64;
    let done = chapters.iter().filter(|c| completed.contains(&c.id)).count() as i64;
    let statuses = chapter_statuses(chapters, &completed, lock_view);
    Ok(CourseStatus {
        course,
        chapters: statuses,
        progress: CourseProgress {
            total_chapters: total,
            completed_chapters: done,
            completion_percentage: completion_percentage(done, total),
        },
    })
}

#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompletedChapterRef {
    pub id: i64,
    pub title: String,
    pub sequence_order: i64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MyCourseProgress {
    pub course_id: i64,
    pub course_title: String,
    pub course_description: String,
    pub chapters: Vec<CompletedChapterRef>,
    pub total_chapters: i64,
    pub completed_chapters: i64,
    pub completion_percentage: i64,
}

/// The student's progress grouped by course, most recently touched first.
pub async fn my_progress(db: &SqlitePool, student_id: i64) -> ApiResult<Vec<MyCourseProgress>> {
    #[derive(sqlx::FromRow)]
    struct CourseRow {
        id: i64,
        title: String,
        description: String,
    }
    let courses = sqlx::query_as::<_, CourseRow>(
        "SELECT c.id, c.title, c.description FROM course c
         WHERE c.id IN (SELECT DISTINCT course_id FROM chapter_progress WHERE student_id = ?1)
         ORDER BY (SELECT MAX(completed_at) FROM chapter_progress
                   WHERE course_id = c.id AND student_id = ?1) DESC",
    )
    .bind(student_id)
    .fetch_all(db)
    .await?;

    let mut out = Vec::with_capacity(courses.len());
    for course in courses {
        let chapters = sqlx::query_as::<_, CompletedChapterRef>(
            "SELECT ch.id, ch.title, ch.sequence_order FROM chapter ch
             JOIN chapter_progress p ON p.chapter_id = ch.id
             WHERE p.student_id = ?1 AND p.course_id = ?2
             ORDER BY p.completed_at DESC",
        )
        .bind(student_id)
        .bind(course.id)
        .fetch_all(db)
        .await?;
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM chapter WHERE course_id = ?1",
        )
        .bind(course.id)
        .fetch_one(db)
        .await?;
        let done = chapters.len() as i64;
        out.push(MyCourseProgress {
            course_id: course.id,
            course_title: course.title,
            course_description: course.description,
            chapters,
            total_chapters: total,
            completed_chapters: done,
            completion_percentage: completion_percentage(done, total),
        });
    }
    Ok(out)
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StudentCourseStat {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub completed_chapters: i64,
    pub total_chapters: i64,
    pub completion_percentage: i64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CourseStudentsReport {
    pub course_id: i64,
    pub course_title: String,
    pub total_chapters: i64,
    pub students: Vec<StudentCourseStat>,
}

/// Per-student completion across a course's roster, for its mentor or an
/// admin.
pub async fn course_students_progress(
    db: &SqlitePool,
    course: &Course,
) -> ApiResult<CourseStudentsReport> {
    let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM chapter WHERE course_id = ?1")
        .bind(course.id)
        .fetch_one(db)
        .await?;
    #[derive(sqlx::FromRow)]
    struct StatRow {
        id: i64,
        name: String,
        email: String,
        completed: i64,
    }
    let rows = sqlx::query_as::<_, StatRow>(
        "SELECT u.id, u.name, u.email,
                (SELECT COUNT(*) FROM chapter_progress p
                 WHERE p.student_id = u.id AND p.course_id = ?1) AS completed
         FROM user u
         JOIN course_student cs ON cs.student_id = u.id
         WHERE cs.course_id = ?1
         ORDER BY u.id",
    )
    .bind(course.id)
    .fetch_all(db)
    .await?;
    let students = rows
        .into_iter()
        .map(|r| StudentCourseStat {
            id: r.id,
            name: r.name,
            email: r.email,
            completed_chapters: r.completed,
            total_chapters: total,
            completion_percentage: completion_percentage(r.completed, total),
        })
        .collect();
    Ok(CourseStudentsReport {
        course_id: course.id,
        course_title: course.title.clone(),
        total_chapters: total,
        students,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::course::test_support::{approved_mentor, course_with, student};
    use crate::chapter::test_support::add_chapter;
    use crate::db::test_pool;

    #[test]
    fn percentage_arithmetic() {
        assert_eq!(completion_percentage(0, 0), 0);
        assert_eq!(completion_percentage(0, 3), 0);
        assert_eq!(completion_percentage(1, 3), 33);
        assert_eq!(completion_percentage(2, 3), 67);
        assert_eq!(completion_percentage(3, 3), 100);
        assert!(!is_fully_complete(0, 0));
        assert!(is_fully_complete(3, 3));
        assert!(!is_fully_complete(2, 3));
    }

    #[tokio::test]
    async fn chapters_unlock_one_step_at_a_time() {
        let db = test_pool().await;
        let mentor = approved_mentor(&db, "Grace").await;
        let alice = student(&db, "Alice").await;
        let course = course_with(&db, &mentor, &[&alice]).await;
        let ch1 = add_chapter(&db, &mentor, course.id, 1).await;
        let ch2 = add_chapter(&db, &mentor, course.id, 2).await;
        let ch3 = add_chapter(&db, &mentor, course.id, 3).await;

        // nothing completed: only the first chapter is open
        let status = status_for_course(&db, alice.id, course.clone(), true)
            .await
            .unwrap();
        let locked: Vec<bool> = status.chapters.iter().map(|c| c.is_locked).collect();
        assert_eq!(locked, vec![false, true, true]);

        complete(&db, alice.id, ch1.id).await.unwrap();
        let status = status_for_course(&db, alice.id, course.clone(), true)
            .await
            .unwrap();
        let locked: Vec<bool> = status.chapters.iter().map(|c| c.is_locked).collect();
        assert_eq!(locked, vec![false, false, true]);
        assert_eq!(status.progress.completion_percentage, 33);

        // skipping ahead is rejected on the write path
        let err = complete(&db, alice.id, ch3.id).await.unwrap_err();
        assert!(matches!(&err, ApiError::Denied(m) if m == OUT_OF_SEQUENCE));

        complete(&db, alice.id, ch2.id).await.unwrap();
        complete(&db, alice.id, ch3.id).await.unwrap();
        let status = status_for_course(&db, alice.id, course, true).await.unwrap();
        assert_eq!(status.progress.completion_percentage, 100);
        assert!(status.chapters.iter().all(|c| c.is_completed));
    }

    #[tokio::test]
    async fn duplicate_completion_is_denied_and_single() {
        let db = test_pool().await;
        let mentor = approved_mentor(&db, "Grace").await;
        let alice = student(&db, "Alice").await;
        let course = course_with(&db, &mentor, &[&alice]).await;
        let ch1 = add_chapter(&db, &mentor, course.id, 1).await;

        complete(&db, alice.id, ch1.id).await.unwrap();
        let err = complete(&db, alice.id, ch1.id).await.unwrap_err();
        assert!(matches!(&err, ApiError::Denied(m) if m == ALREADY_COMPLETED));

        let rows: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chapter_progress WHERE student_id = ?1 AND chapter_id = ?2",
        )
        .bind(alice.id)
        .bind(ch1.id)
        .fetch_one(&db)
        .await
        .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn constraint_conflict_reads_like_the_precheck() {
        let db = test_pool().await;
        let mentor = approved_mentor(&db, "Grace").await;
        let alice = student(&db, "Alice").await;
        let course = course_with(&db, &mentor, &[&alice]).await;
        let ch1 = add_chapter(&db, &mentor, course.id, 1).await;

        // two racing inserts that both passed the pre-check: the second hits
        // the UNIQUE constraint and must surface the same denial
        insert_record(&db, alice.id, course.id, ch1.id).await.unwrap();
        let err = insert_record(&db, alice.id, course.id, ch1.id)
            .await
            .unwrap_err();
        assert!(matches!(&err, ApiError::Denied(m) if m == ALREADY_COMPLETED));
    }

    #[tokio::test]
    async fn enrollment_and_existence_are_checked_first() {
        let db = test_pool().await;
        let mentor = approved_mentor(&db, "Grace").await;
        let alice = student(&db, "Alice").await;
        let outsider = student(&db, "Mallory").await;
        let course = course_with(&db, &mentor, &[&alice]).await;
        let ch1 = add_chapter(&db, &mentor, course.id, 1).await;

        let err = complete(&db, outsider.id, ch1.id).await.unwrap_err();
        assert!(matches!(&err, ApiError::Forbidden(m) if m == NOT_ENROLLED));

        let err = complete(&db, alice.id, 424242).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn status_lock_checks_only_the_immediate_predecessor() {
        let db = test_pool().await;
        let mentor = approved_mentor(&db, "Grace").await;
        let alice = student(&db, "Alice").await;
        let course = course_with(&db, &mentor, &[&alice]).await;
        let _ch1 = add_chapter(&db, &mentor, course.id, 1).await;
        let ch2 = add_chapter(&db, &mentor, course.id, 2).await;
        let ch3 = add_chapter(&db, &mentor, course.id, 3).await;

        // legacy row: chapter 2 completed without chapter 1
        insert_record(&db, alice.id, course.id, ch2.id).await.unwrap();

        let status = status_for_course(&db, alice.id, course.clone(), true)
            .await
            .unwrap();
        let locked: Vec<bool> = status.chapters.iter().map(|c| c.is_locked).collect();
        // the view unlocks chapter 3 because its predecessor is complete...
        assert_eq!(locked, vec![false, true, false]);
        // ...while the write path still rejects it over the incomplete prefix
        let err = complete(&db, alice.id, ch3.id).await.unwrap_err();
        assert!(matches!(&err, ApiError::Denied(m) if m == OUT_OF_SEQUENCE));
    }

    #[tokio::test]
    async fn mentor_view_has_no_locks() {
        let db = test_pool().await;
        let mentor = approved_mentor(&db, "Grace").await;
        let alice = student(&db, "Alice").await;
        let course = course_with(&db, &mentor, &[&alice]).await;
        add_chapter(&db, &mentor, course.id, 1).await;
        add_chapter(&db, &mentor, course.id, 2).await;

        let status = status_for_course(&db, alice.id, course, false).await.unwrap();
        assert!(status.chapters.iter().all(|c| !c.is_locked));
    }

    #[tokio::test]
    async fn percentage_is_monotone_and_grouped_by_course() {
        let db = test_pool().await;
        let mentor = approved_mentor(&db, "Grace").await;
        let alice = student(&db, "Alice").await;
        let course = course_with(&db, &mentor, &[&alice]).await;
        let ch1 = add_chapter(&db, &mentor, course.id, 1).await;
        let ch2 = add_chapter(&db, &mentor, course.id, 2).await;

        let mut last = 0;
        for ch in [ch1.id, ch2.id] {
            complete(&db, alice.id, ch).await.unwrap();
            let groups = my_progress(&db, alice.id).await.unwrap();
            assert_eq!(groups.len(), 1);
            let pct = groups[0].completion_percentage;
            assert!(pct >= last);
            last = pct;
        }
        assert_eq!(last, 100);
    }

    #[tokio::test]
    async fn roster_report_counts_each_student() {
        let db = test_pool().await;
        let mentor = approved_mentor(&db, "Grace").await;
        let alice = student(&db, "Alice").await;
        let bob = student(&db, "Bob").await;
        let course = course_with(&db, &mentor, &[&alice, &bob]).await;
        let ch1 = add_chapter(&db, &mentor, course.id, 1).await;
        add_chapter(&db, &mentor, course.id, 2).await;
        complete(&db, alice.id, ch1.id).await.unwrap();

        let report = course_students_progress(&db, &course).await.unwrap();
        assert_eq!(report.total_chapters, 2);
        let alice_stat = report.students.iter().find(|s| s.id == alice.id).unwrap();
        assert_eq!(alice_stat.completed_chapters, 1);
        assert_eq!(alice_stat.completion_percentage, 50);
        let bob_stat = report.students.iter().find(|s| s.id == bob.id).unwrap();
        assert_eq!(bob_stat.completed_chapters, 0);
    }
}
