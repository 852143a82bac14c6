use argon2::{
    Argon2, PasswordVerifier,
    password_hash::{PasswordHash, PasswordHasher, SaltString, rand_core::OsRng},
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::error::{ApiError, ApiResult, is_unique_violation};
use crate::utils::now_utc;

/// Closed set of account roles. Every access-control decision is a predicate
/// on this enum; admins pass every role check.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    Student,
    Mentor,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Mentor => "mentor",
            Role::Admin => "admin",
        }
    }

    pub fn authorize(self, allowed: &[Role]) -> ApiResult<()> {
        if self == Role::Admin || allowed.contains(&self) {
            Ok(())
        } else {
            Err(ApiError::forbidden(format!(
                "User role '{}' is not authorized to access this route",
                self.as_str()
            )))
        }
    }
}

/// Public account record; the password hash never leaves this module.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub is_approved: bool,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Name-and-email reference embedded in course, progress and certificate
/// payloads.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct PersonRef {
    pub id: i64,
    pub name: String,
    pub email: String,
}

const USER_COLUMNS: &str = "id, name, email, role, is_approved, is_active, created_at";

fn hash_password(password: &str) -> ApiResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
        .to_string();
    Ok(hash)
}

pub async fn get_user(db: &SqlitePool, id: i64) -> ApiResult<UserInfo> {
    let sql = format!("SELECT {USER_COLUMNS} FROM user WHERE id = ?1");
    sqlx::query_as::<_, UserInfo>(&sql)
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

pub async fn create_user(
    db: &SqlitePool,
    name: String,
    email: String,
    password: String,
    role: Role,
) -> ApiResult<UserInfo> {
    if name.trim().is_empty() || email.trim().is_empty() || password.is_empty() {
        return Err(ApiError::denied("Name, email and password are required"));
    }
    let password_hash = hash_password(&password)?;
    // Mentor accounts start unapproved and are unlocked by an admin.
    let is_approved = role != Role::Mentor;
    let result = sqlx::query(
        "INSERT INTO user (name, email, password, role, is_approved, is_active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
    )
    .bind(name.trim())
    .bind(email.trim())
    .bind(password_hash)
    .bind(role)
    .bind(is_approved)
    .bind(now_utc())
    .execute(db)
    .await;
    match result {
        Ok(r) => get_user(db, r.last_insert_rowid()).await,
        Err(e) if is_unique_violation(&e) => Err(ApiError::denied("Email already in use")),
        Err(e) => Err(e.into()),
    }
}

pub async fn login(db: &SqlitePool, email: String, password: String) -> ApiResult<UserInfo> {
    #[derive(sqlx::FromRow)]
    struct LoginRow {
        id: i64,
        password: String,
        is_active: bool,
    }
    let Some(row) =
        sqlx::query_as::<_, LoginRow>("SELECT id, password, is_active FROM user WHERE email = ?1")
            .bind(email.trim())
            .fetch_optional(db)
            .await?
    else {
        return Err(ApiError::denied("Invalid email or password"));
    };
    let parsed_hash = PasswordHash::new(&row.password)
        .map_err(|e| anyhow::anyhow!("Failed to parse password hash: {}", e))?;
    if Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_err()
    {
        return Err(ApiError::denied("Invalid email or password"));
    }
    if !row.is_active {
        return Err(ApiError::forbidden("Your account has been blocked"));
    }
    get_user(db, row.id).await
}

pub async fn list_users(db: &SqlitePool) -> ApiResult<Vec<UserInfo>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM user ORDER BY created_at DESC, id DESC");
    Ok(sqlx::query_as::<_, UserInfo>(&sql).fetch_all(db).await?)
}

pub async fn list_students(db: &SqlitePool) -> ApiResult<Vec<UserInfo>> {
    let sql = format!(
        "SELECT {USER_COLUMNS} FROM user WHERE role = 'student' ORDER BY created_at DESC, id DESC"
    );
    Ok(sqlx::query_as::<_, UserInfo>(&sql).fetch_all(db).await?)
}

pub async fn list_mentors(db: &SqlitePool) -> ApiResult<Vec<UserInfo>> {
    let sql = format!(
        "SELECT {USER_COLUMNS} FROM user WHERE role = 'mentor' ORDER BY created_at DESC, id DESC"
    );
    Ok(sqlx::query_as::<_, UserInfo>(&sql).fetch_all(db).await?)
}

pub async fn approve_mentor(db: &SqlitePool, id: i64, is_approved: bool) -> ApiResult<UserInfo> {
    let user = get_user(db, id).await?;
    if user.role != Role::Mentor {
        return Err(ApiError::denied("User is not a mentor"));
    }
    sqlx::query("UPDATE user SET is_approved = ?1 WHERE id = ?2")
        .bind(is_approved)
        .bind(id)
        .execute(db)
        .await?;
    get_user(db, id).await
}

/// Admin-editable account fields; absent fields are left unchanged.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
}

pub async fn update_user(
    db: &SqlitePool,
    acting: &UserInfo,
    id: i64,
    update: UserUpdate,
) -> ApiResult<UserInfo> {
    let user = get_user(db, id).await?;
    if user.role == Role::Admin && acting.id != id {
        return Err(ApiError::forbidden("Cannot modify other admin accounts"));
    }
    if acting.id == id {
        if let Some(role) = update.role {
            if role != user.role {
                return Err(ApiError::forbidden("Cannot change your own role"));
            }
        }
    }
    if let Some(name) = &update.name {
        sqlx::query("UPDATE user SET name = ?1 WHERE id = ?2")
            .bind(name)
            .bind(id)
            .execute(db)
            .await?;
    }
    if let Some(email) = &update.email {
        let taken = sqlx::query_scalar::<_, i64>("SELECT id FROM user WHERE email = ?1 AND id != ?2")
            .bind(email)
            .bind(id)
            .fetch_optional(db)
            .await?;
        if taken.is_some() {
            return Err(ApiError::denied("Email already in use"));
        }
        sqlx::query("UPDATE user SET email = ?1 WHERE id = ?2")
            .bind(email)
            .bind(id)
            .execute(db)
            .await?;
    }
    if let Some(role) = update.role {
        // Role changes reset the approval gate: a fresh mentor waits for
        // approval again, everyone else is approved by definition.
        let is_approved = role != Role::Mentor;
        sqlx::query("UPDATE user SET role = ?1, is_approved = ?2 WHERE id = ?3")
            .bind(role)
            .bind(is_approved)
            .bind(id)
            .execute(db)
            .await?;
    }
    get_user(db, id).await
}

pub async fn set_user_active(
    db: &SqlitePool,
    acting: &UserInfo,
    id: i64,
    is_active: bool,
) -> ApiResult<UserInfo> {
    let user = get_user(db, id).await?;
    if acting.id == id {
        return Err(ApiError::forbidden("Cannot deactivate your own account"));
    }
    if user.role == Role::Admin && !is_active {
        return Err(ApiError::forbidden("Cannot deactivate admin accounts"));
    }
    sqlx::query("UPDATE user SET is_active = ?1 WHERE id = ?2")
        .bind(is_active)
        .bind(id)
        .execute(db)
        .await?;
    get_user(db, id).await
}

pub async fn delete_user(db: &SqlitePool, acting: &UserInfo, id: i64) -> ApiResult<()> {
    let user = get_user(db, id).await?;
    if acting.id == id {
        return Err(ApiError::forbidden("Cannot delete your own account"));
    }
    if user.role == Role::Admin {
        return Err(ApiError::forbidden("Cannot delete admin accounts"));
    }
    // Enrollment goes with the account; progress rows are references, not
    // owned, and stay behind.
    let mut tx = db.begin().await?;
    sqlx::query("DELETE FROM course_student WHERE student_id = ?1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM user WHERE id = ?1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Create the admin account, or reset its password and role if the email is
/// already registered.
pub async fn create_or_update_admin(
    db: &SqlitePool,
    name: String,
    email: String,
    password: String,
) -> ApiResult<UserInfo> {
    let password_hash = hash_password(&password)?;
    let existing = sqlx::query_scalar::<_, i64>("SELECT id FROM user WHERE email = ?1")
        .bind(email.trim())
        .fetch_optional(db)
        .await?;
    let id = match existing {
        Some(id) => {
            sqlx::query(
                "UPDATE user SET name = ?1, password = ?2, role = 'admin',
                 is_approved = 1, is_active = 1 WHERE id = ?3",
            )
            .bind(name.trim())
            .bind(password_hash)
            .bind(id)
            .execute(db)
            .await?;
            id
        }
        None => sqlx::query(
            "INSERT INTO user (name, email, password, role, is_approved, is_active, created_at)
             VALUES (?1, ?2, ?3, 'admin', 1, 1, ?4)",
        )
        .bind(name.trim())
        .bind(email.trim())
        .bind(password_hash)
        .bind(now_utc())
        .execute(db)
        .await?
        .last_insert_rowid(),
    };
    get_user(db, id).await
}
