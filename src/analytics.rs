use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use utoipa::{IntoParams, ToSchema};

use crate::chapter::Chapter;
use crate::course::Course;
use crate::error::ApiResult;
use crate::progress::completion_percentage;
use crate::user::{Role, UserInfo};

/// Point-in-time copy of the collections the reports aggregate over. Every
/// report is a pure function of a snapshot (plus the relevant accounts), so
/// there is no process-wide aggregation state to go stale.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub courses: Vec<Course>,
    /// course id -> enrolled student ids
    pub rosters: HashMap<i64, Vec<i64>>,
    /// course id -> chapters ascending by sequence order
    pub chapters: HashMap<i64, Vec<Chapter>>,
    pub progress: Vec<ProgressRow>,
    /// issued (student id, course id) pairs
    pub certificates: HashSet<(i64, i64)>,
}

#[derive(Debug, Clone, Copy, sqlx::FromRow)]
pub struct ProgressRow {
    pub student_id: i64,
    pub course_id: i64,
    pub chapter_id: i64,
}

impl Snapshot {
    pub async fn load(db: &SqlitePool) -> ApiResult<Self> {
        let courses = sqlx::query_as::<_, Course>("SELECT * FROM course")
            .fetch_all(db)
            .await?;

        let mut rosters: HashMap<i64, Vec<i64>> = HashMap::new();
        let roster_rows = sqlx::query_as::<_, (i64, i64)>(
            "SELECT course_id, student_id FROM course_student ORDER BY course_id, student_id",
        )
        .fetch_all(db)
        .await?;
        for (course_id, student_id) in roster_rows {
            rosters.entry(course_id).or_default().push(student_id);
        }

        let mut chapters: HashMap<i64, Vec<Chapter>> = HashMap::new();
        let chapter_rows = sqlx::query_as::<_, Chapter>(
            "SELECT * FROM chapter ORDER BY course_id, sequence_order",
        )
        .fetch_all(db)
        .await?;
        for chapter in chapter_rows {
            chapters.entry(chapter.course_id).or_default().push(chapter);
        }

        let progress = sqlx::query_as::<_, ProgressRow>(
            "SELECT student_id, course_id, chapter_id FROM chapter_progress",
        )
        .fetch_all(db)
        .await?;

        let certificates = sqlx::query_as::<_, (i64, i64)>(
            "SELECT student_id, course_id FROM certificate",
        )
        .fetch_all(db)
        .await?
        .into_iter()
        .collect();

        Ok(Self {
            courses,
            rosters,
            chapters,
            progress,
            certificates,
        })
    }

    fn total_chapters(&self, course_id: i64) -> i64 {
        self.chapters.get(&course_id).map_or(0, |c| c.len() as i64)
    }

    /// (student, course) -> completed chapter count.
    fn completions_by_pair(&self) -> HashMap<(i64, i64), i64> {
        let mut map: HashMap<(i64, i64), i64> = HashMap::new();
        for row in &self.progress {
            *map.entry((row.student_id, row.course_id)).or_default() += 1;
        }
        map
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlatformSummary {
    pub total_users: i64,
    pub total_students: i64,
    pub total_mentors: i64,
    pub total_courses: i64,
    pub total_chapters: i64,
    pub total_chapter_completions: i64,
    /// Distinct (student, course) pairs that completed every chapter of a
    /// course that has at least one.
    pub total_completions: i64,
}

pub fn summarize(users: &[UserInfo], snap: &Snapshot) -> PlatformSummary {
    let total_completions = snap
        .completions_by_pair()
        .iter()
        .filter(|((_, course_id), completed)| {
            let total = snap.total_chapters(*course_id);
            total > 0 && **completed >= total
        })
        .count() as i64;
    PlatformSummary {
        total_users: users.len() as i64,
        total_students: users.iter().filter(|u| u.role == Role::Student).count() as i64,
        total_mentors: users.iter().filter(|u| u.role == Role::Mentor).count() as i64,
        total_courses: snap.courses.len() as i64,
        total_chapters: snap.chapters.values().map(|c| c.len() as i64).sum(),
        total_chapter_completions: snap.progress.len() as i64,
        total_completions,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum ProgressStatus {
    NotStarted,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CompletionLevel {
    High,
    Medium,
    Low,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct StudentProgressFilter {
    pub course_id: Option<i64>,
    pub progress_status: Option<ProgressStatus>,
    pub completion_level: Option<CompletionLevel>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CurrentChapter {
    pub title: String,
    pub sequence_order: i64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StudentCourseProgress {
    pub course_id: i64,
    pub course_title: String,
    pub mentor_name: String,
    pub total_chapters: i64,
    pub completed_chapters: i64,
    pub completion_percentage: i64,
    /// First incomplete chapter, or the last one when everything is done.
    pub current_chapter: Option<CurrentChapter>,
    pub certificate_status: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StudentProgressReport {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(with = "time::serde::rfc3339")]
    pub signup_date: OffsetDateTime,
    pub account_status: String,
    pub courses: Vec<StudentCourseProgress>,
    pub total_courses: i64,
    pub avg_completion: i64,
}

fn course_progress_for_student(
    student: &UserInfo,
    course: &Course,
    snap: &Snapshot,
    completions: &HashMap<(i64, i64), i64>,
    mentor_names: &HashMap<i64, String>,
) -> StudentCourseProgress {
    let chapters = snap.chapters.get(&course.id).map_or(&[][..], |c| &c[..]);
    let total = chapters.len() as i64;
    let completed = completions
        .get(&(student.id, course.id))
        .copied()
        .unwrap_or(0);
    let completed_ids: HashSet<i64> = snap
        .progress
        .iter()
        .filter(|p| p.student_id == student.id && p.course_id == course.id)
        .map(|p| p.chapter_id)
        .collect();
    let current = chapters
        .iter()
        .find(|c| !completed_ids.contains(&c.id))
        .or_else(|| chapters.last())
        .map(|c| CurrentChapter {
            title: c.title.clone(),
            sequence_order: c.sequence_order,
        });
    let has_certificate = snap.certificates.contains(&(student.id, course.id));
    StudentCourseProgress {
        course_id: course.id,
        course_title: course.title.clone(),
        mentor_name: mentor_names
            .get(&course.mentor_id)
            .cloned()
            .unwrap_or_else(|| "Unknown".to_string()),
        total_chapters: total,
        completed_chapters: completed,
        completion_percentage: completion_percentage(completed, total),
        current_chapter: current,
        certificate_status: if has_certificate { "Issued" } else { "Not Issued" }.to_string(),
    }
}

/// Per-student progress across every assigned course. All three filters are
/// conjunctive; the bucket filters match when any assigned course satisfies
/// the bucket, the level filter applies to the student's average.
pub fn student_progress_report(
    students: &[UserInfo],
    mentor_names: &HashMap<i64, String>,
    snap: &Snapshot,
    filter: &StudentProgressFilter,
) -> Vec<StudentProgressReport> {
    let completions = snap.completions_by_pair();
    let mut reports = Vec::new();
    for student in students {
        let assigned: Vec<&Course> = snap
            .courses
            .iter()
            .filter(|c| {
                snap.rosters
                    .get(&c.id)
                    .is_some_and(|r| r.contains(&student.id))
            })
            .collect();
        let courses: Vec<StudentCourseProgress> = assigned
            .iter()
            .map(|c| course_progress_for_student(student, c, snap, &completions, mentor_names))
            .collect();

        if let Some(course_id) = filter.course_id {
            if !courses.iter().any(|c| c.course_id == course_id) {
                continue;
            }
        }
        if let Some(status) = filter.progress_status {
            let matched = courses.iter().any(|c| match status {
                ProgressStatus::NotStarted => c.completion_percentage == 0,
                ProgressStatus::InProgress => {
                    c.completion_percentage > 0 && c.completion_percentage < 100
                }
                ProgressStatus::Completed => c.completion_percentage == 100,
            });
            if !matched {
                continue;
            }
        }
        let avg = if courses.is_empty() {
            0.0
        } else {
            courses
                .iter()
                .map(|c| c.completion_percentage as f64)
                .sum::<f64>()
                / courses.len() as f64
        };
        if let Some(level) = filter.completion_level {
            let matched = match level {
                CompletionLevel::High => avg >= 70.0,
                CompletionLevel::Medium => (30.0..70.0).contains(&avg),
                CompletionLevel::Low => avg < 30.0,
            };
            if !matched {
                continue;
            }
        }

        reports.push(StudentProgressReport {
            id: student.id,
            name: student.name.clone(),
            email: student.email.clone(),
            signup_date: student.created_at,
            account_status: if student.is_active { "Active" } else { "Blocked" }.to_string(),
            total_courses: courses.len() as i64,
            avg_completion: avg.round() as i64,
            courses,
        });
    }
    reports
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MentorCourseStats {
    pub course_id: i64,
    pub course_title: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub is_active: bool,
    pub total_chapters: i64,
    pub enrolled_students: i64,
    /// Distinct students with at least one progress row in the course.
    pub active_students: i64,
    pub avg_completion: i64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MentorActivityReport {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub is_approved: bool,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub signup_date: OffsetDateTime,
    /// "Active" when any owned course was updated in the last 30 days.
    pub activity_status: String,
    pub total_courses: i64,
    pub active_courses: i64,
    pub total_students: i64,
    pub courses: Vec<MentorCourseStats>,
}

pub fn mentor_activity_report(
    mentors: &[UserInfo],
    snap: &Snapshot,
    now: OffsetDateTime,
) -> Vec<MentorActivityReport> {
    let activity_cutoff = now - time::Duration::days(30);
    mentors
        .iter()
        .map(|mentor| {
            let owned: Vec<&Course> = snap
                .courses
                .iter()
                .filter(|c| c.mentor_id == mentor.id)
                .collect();
            let courses: Vec<MentorCourseStats> = owned
                .iter()
                .map(|course| {
                    let total = snap.total_chapters(course.id);
                    let enrolled = snap.rosters.get(&course.id).map_or(0, |r| r.len() as i64);
                    let mut per_student: HashMap<i64, i64> = HashMap::new();
                    for row in snap.progress.iter().filter(|p| p.course_id == course.id) {
                        *per_student.entry(row.student_id).or_default() += 1;
                    }
                    let avg_completion = if enrolled > 0 && total > 0 {
                        let total_completed: i64 = per_student.values().sum();
                        ((total_completed as f64 / (enrolled * total) as f64) * 100.0).round()
                            as i64
                    } else {
                        0
                    };
                    MentorCourseStats {
                        course_id: course.id,
                        course_title: course.title.clone(),
                        created_at: course.created_at,
                        is_active: course.is_active,
                        total_chapters: total,
                        enrolled_students: enrolled,
                        active_students: per_student.len() as i64,
                        avg_completion,
                    }
                })
                .collect();
            let recent_activity = owned.iter().any(|c| c.updated_at > activity_cutoff);
            MentorActivityReport {
                id: mentor.id,
                name: mentor.name.clone(),
                email: mentor.email.clone(),
                is_approved: mentor.is_approved,
                is_active: mentor.is_active,
                signup_date: mentor.created_at,
                activity_status: if recent_activity { "Active" } else { "Inactive" }.to_string(),
                total_courses: owned.len() as i64,
                active_courses: owned.iter().filter(|c| c.is_active).count() as i64,
                total_students: courses.iter().map(|c| c.enrolled_students).sum(),
                courses,
            }
        })
        .collect()
}
