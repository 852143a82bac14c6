use std::time::Duration;

use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};

/// Connect to SQLite with foreign keys enforced on every connection.
pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON;")
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("PRAGMA journal_mode = WAL;")
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("PRAGMA busy_timeout = 5000;")
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Runs a single, consolidated migration for the current schema.
///
/// The UNIQUE constraints on `chapter(course_id, sequence_order)`,
/// `chapter_progress(student_id, chapter_id)` and
/// `certificate(student_id, course_id)` / `certificate(certificate_number)`
/// are what the completion and issuance invariants rely on.
pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );
        ",
    )
    .execute(pool)
    .await?;

    // Version 1: full schema.
    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS user (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                password TEXT NOT NULL,
                role TEXT NOT NULL CHECK (role IN ('student', 'mentor', 'admin')),
                is_approved INTEGER NOT NULL DEFAULT 1,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS course (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                mentor_id INTEGER NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS course_student (
                course_id INTEGER NOT NULL REFERENCES course(id),
                student_id INTEGER NOT NULL,
                PRIMARY KEY (course_id, student_id)
            );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS chapter (
                id INTEGER PRIMARY KEY,
                course_id INTEGER NOT NULL REFERENCES course(id),
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                image TEXT NOT NULL DEFAULT '',
                video_link TEXT NOT NULL,
                sequence_order INTEGER NOT NULL CHECK (sequence_order >= 1),
                created_at TEXT NOT NULL,
                UNIQUE (course_id, sequence_order)
            );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS chapter_progress (
                id INTEGER PRIMARY KEY,
                student_id INTEGER NOT NULL,
                course_id INTEGER NOT NULL REFERENCES course(id),
                chapter_id INTEGER NOT NULL REFERENCES chapter(id),
                completed_at TEXT NOT NULL,
                UNIQUE (student_id, chapter_id)
            );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
            -- Certificates stay valid and verifiable even after the course
            -- or the account is gone, so no foreign keys here.
            CREATE TABLE IF NOT EXISTS certificate (
                id INTEGER PRIMARY KEY,
                student_id INTEGER NOT NULL,
                course_id INTEGER NOT NULL,
                certificate_number TEXT NOT NULL UNIQUE,
                issued_at TEXT NOT NULL,
                UNIQUE (student_id, course_id)
            );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_progress_course_student
                ON chapter_progress (course_id, student_id);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_course_mentor
                ON course (mentor_id);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
            INSERT INTO schema_migrations (version, applied_at)
            VALUES (?1, ?2)
            ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(crate::utils::now_utc())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
    }

    Ok(())
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    // One connection so the in-memory database is shared by every query.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON;")
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect("sqlite::memory:")
        .await
        .expect("connect in-memory sqlite");
    migrate(&pool).await.expect("migrate");
    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migration_is_idempotent() {
        let pool = test_pool().await;
        migrate(&pool).await.expect("second run");
        let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(applied, 1);
    }

    #[tokio::test]
    async fn migrate_on_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("lms.db").display());
        let pool = connect(&url).await.unwrap();
        migrate(&pool).await.unwrap();
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(n, 0);
    }
}
