use rand::{Rng, distributions::Alphanumeric};
use serde::Serialize;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::course;
use crate::error::{ApiError, ApiResult, is_unique_violation};
use crate::progress::{self, NOT_ENROLLED};
use crate::user::UserInfo;
use crate::utils::now_utc;

/// Immutable once issued; at most one per `(student, course)`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub id: i64,
    pub student_id: i64,
    pub course_id: i64,
    pub certificate_number: String,
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,
}

/// Certificate joined with the names a client prints on it.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssuedCertificate {
    #[serde(flatten)]
    pub certificate: Certificate,
    pub student_name: String,
    pub course_title: String,
    pub mentor_name: Option<String>,
}

fn generate_certificate_number() -> String {
    let millis = now_utc().unix_timestamp_nanos() / 1_000_000;
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect::<String>()
        .to_uppercase();
    format!("CERT-{millis}-{suffix}")
}

async fn find_certificate(
    db: &SqlitePool,
    student_id: i64,
    course_id: i64,
) -> ApiResult<Option<Certificate>> {
    Ok(sqlx::query_as::<_, Certificate>(
        "SELECT * FROM certificate WHERE student_id = ?1 AND course_id = ?2",
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_optional(db)
    .await?)
}

/// Issue the certificate on the first eligible call and return the identical
/// record on every later one. Writes at most once per `(student, course)`.
pub async fn issue_or_fetch(
    db: &SqlitePool,
    student: &UserInfo,
    course_id: i64,
) -> ApiResult<IssuedCertificate> {
    let course = course::get_course(db, course_id).await?;
    if !course::is_enrolled(db, course_id, student.id).await? {
        return Err(ApiError::forbidden(NOT_ENROLLED));
    }
    let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM chapter WHERE course_id = ?1")
        .bind(course_id)
        .fetch_one(db)
        .await?;
    if total == 0 {
        return Err(ApiError::denied("Course has no chapters yet"));
    }
    let completed = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM chapter_progress WHERE student_id = ?1 AND course_id = ?2",
    )
    .bind(student.id)
    .bind(course_id)
    .fetch_one(db)
    .await?;
    let percentage = progress::completion_percentage(completed, total);
    if !progress::is_fully_complete(completed, total) {
        return Err(ApiError::denied(format!(
            "Certificate available only after 100% completion. Current progress: {percentage}%"
        )));
    }

    let certificate = match find_certificate(db, student.id, course_id).await? {
        Some(existing) => existing,
        None => {
            let result = sqlx::query(
                "INSERT INTO certificate (student_id, course_id, certificate_number, issued_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(student.id)
            .bind(course_id)
            .bind(generate_certificate_number())
            .bind(now_utc())
            .execute(db)
            .await;
            match result {
                Ok(r) => {
                    sqlx::query_as::<_, Certificate>("SELECT * FROM certificate WHERE id = ?1")
                        .bind(r.last_insert_rowid())
                        .fetch_one(db)
                        .await?
                }
                // lost the issuance race: the winner's record is the record
                Err(e) if is_unique_violation(&e) => find_certificate(db, student.id, course_id)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("certificate vanished after conflict"))?,
                Err(e) => return Err(e.into()),
            }
        }
    };

    let mentor_name =
        sqlx::query_scalar::<_, String>("SELECT name FROM user WHERE id = ?1")
            .bind(course.mentor_id)
            .fetch_optional(db)
            .await?;
    Ok(IssuedCertificate {
        certificate,
        student_name: student.name.clone(),
        course_title: course.title,
        mentor_name,
    })
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedCertificate {
    pub certificate_number: String,
    pub student_name: String,
    pub course_title: String,
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VerificationResponse {
    pub valid: bool,
    pub certificate: VerifiedCertificate,
}

/// Public lookup by number. Certificates outlive their course and student,
/// so missing names degrade instead of failing the lookup.
pub async fn verify(db: &SqlitePool, certificate_number: &str) -> ApiResult<VerificationResponse> {
    #[derive(sqlx::FromRow)]
    struct VerifyRow {
        certificate_number: String,
        issued_at: OffsetDateTime,
        student_name: Option<String>,
        course_title: Option<String>,
    }
    let row = sqlx::query_as::<_, VerifyRow>(
        "SELECT c.certificate_number, c.issued_at, u.name AS student_name, co.title AS course_title
         FROM certificate c
         LEFT JOIN user u ON u.id = c.student_id
         LEFT JOIN course co ON co.id = c.course_id
         WHERE c.certificate_number = ?1",
    )
    .bind(certificate_number)
    .fetch_optional(db)
    .await?
    .ok_or_else(|| ApiError::not_found("Certificate not found"))?;
    Ok(VerificationResponse {
        valid: true,
        certificate: VerifiedCertificate {
            certificate_number: row.certificate_number,
            student_name: row.student_name.unwrap_or_else(|| "Unknown".to_string()),
            course_title: row.course_title.unwrap_or_else(|| "Unknown".to_string()),
            issued_at: row.issued_at,
        },
    })
}
