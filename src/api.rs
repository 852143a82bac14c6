pub mod analytics;
pub mod auth;
pub mod certificates;
pub mod chapters;
pub mod courses;
pub mod progress;
pub mod users;

use sqlx::SqlitePool;
use tower_sessions::Session;

use crate::error::{ApiError, ApiResult};
use crate::user::{self, Role, UserInfo};

pub const SESSION_USER_KEY: &str = "user_id";

fn session_error(e: tower_sessions::session::Error) -> ApiError {
    ApiError::Internal(anyhow::anyhow!("session store: {e}"))
}

/// Resolve the session to a live account: 401 without a session or when the
/// account behind it is gone, 403 for blocked accounts and for mentors still
/// waiting for approval.
pub async fn require_user(session: &Session, db: &SqlitePool) -> ApiResult<UserInfo> {
    let user_id: i64 = session
        .get(SESSION_USER_KEY)
        .await
        .map_err(session_error)?
        .ok_or(ApiError::Unauthorized)?;
    let user = match user::get_user(db, user_id).await {
        Ok(user) => user,
        Err(ApiError::NotFound(_)) => return Err(ApiError::Unauthorized),
        Err(e) => return Err(e),
    };
    if !user.is_active {
        return Err(ApiError::forbidden("Your account has been blocked"));
    }
    if user.role == Role::Mentor && !user.is_approved {
        return Err(ApiError::forbidden(
            "Your mentor account is pending admin approval",
        ));
    }
    Ok(user)
}
