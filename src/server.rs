use std::time::Duration;

use axum::Router;
use sqlx::SqlitePool;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tower_sessions::{Expiry, SessionManagerLayer};
use tower_sessions_sqlx_store::SqliteStore;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
}

#[derive(OpenApi)]
#[openapi(paths(
    api::auth::register,
    api::auth::register_mentor,
    api::auth::login,
    api::auth::logout,
    api::auth::me,
    api::users::list_users,
    api::users::list_students,
    api::users::approve_mentor,
    api::users::update_user,
    api::users::set_user_active,
    api::users::delete_user,
    api::courses::create_course,
    api::courses::my_courses,
    api::courses::get_course,
    api::courses::update_course,
    api::courses::delete_course,
    api::courses::assign_students,
    api::courses::reassign_students,
    api::courses::set_course_active,
    api::chapters::create_chapter,
    api::chapters::list_chapters,
    api::chapters::get_chapter,
    api::chapters::update_chapter,
    api::chapters::delete_chapter,
    api::progress::complete_chapter,
    api::progress::course_status,
    api::progress::my_progress,
    api::progress::course_students,
    api::certificates::get_certificate,
    api::certificates::verify_certificate,
    api::analytics::summary,
    api::analytics::students_progress,
    api::analytics::mentors_activity,
))]
pub struct ApiDoc;

/// Assemble the full application: API routes behind the session layer,
/// Swagger UI, and request tracing/CORS/timeout on the outside.
pub async fn build(db: SqlitePool, session_days: i64) -> anyhow::Result<Router> {
    let session_store = SqliteStore::new(db.clone());
    session_store.migrate().await?;
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(false)
        .with_expiry(Expiry::OnInactivity(time::Duration::days(session_days)));

    let api_routes = Router::new()
        .merge(api::auth::router())
        .merge(api::users::router())
        .merge(api::courses::router())
        .merge(api::chapters::router())
        .merge(api::progress::router())
        .merge(api::certificates::router())
        .merge(api::analytics::router())
        .layer(session_layer)
        .with_state(AppState { db });

    Ok(Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(Duration::from_secs(30))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use crate::db::test_pool;
    use crate::user;

    /// Send one request; returns status, the session cookie if one was set,
    /// and the JSON body (Null for empty bodies).
    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        cookie: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Option<String>, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(str::to_string);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, set_cookie, value)
    }

    async fn login(app: &Router, email: &str) -> String {
        let (status, cookie, _) = send(
            app,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({ "email": email, "password": "secret" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        cookie.expect("login sets a session cookie")
    }

    #[tokio::test]
    async fn session_lifecycle() {
        let db = test_pool().await;
        let app = build(db, 5).await.unwrap();

        let (status, _, _) = send(&app, "GET", "/api/auth/me", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _, body) = send(
            &app,
            "POST",
            "/api/auth/register",
            None,
            Some(json!({ "name": "Ada", "email": "ada@example.com", "password": "secret" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["role"], "student");

        let cookie = login(&app, "ada@example.com").await;
        let (status, _, body) = send(&app, "GET", "/api/auth/me", Some(&cookie), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "ada@example.com");

        let (status, _, _) = send(&app, "POST", "/api/auth/logout", Some(&cookie), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _, _) = send(&app, "GET", "/api/auth/me", Some(&cookie), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unapproved_mentor_is_held_at_the_door() {
        let db = test_pool().await;
        let app = build(db, 5).await.unwrap();

        send(
            &app,
            "POST",
            "/api/auth/register-mentor",
            None,
            Some(json!({ "name": "Grace", "email": "grace@example.com", "password": "secret" })),
        )
        .await;
        let cookie = login(&app, "grace@example.com").await;
        let (status, _, body) = send(
            &app,
            "POST",
            "/api/courses",
            Some(&cookie),
            Some(json!({ "title": "Rust", "description": "From zero" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body["message"].as_str().unwrap().contains("pending"));
    }

    /// The whole gated-progress story over HTTP: author a course, enroll a
    /// student, complete chapters in order, get denied out of order, finish,
    /// collect the certificate twice, verify it publicly.
    #[tokio::test]
    async fn sequential_completion_to_certificate() {
        let db = test_pool().await;
        user::create_or_update_admin(
            &db,
            "Root".into(),
            "admin@example.com".into(),
            "secret".into(),
        )
        .await
        .unwrap();
        let app = build(db, 5).await.unwrap();

        // mentor registers, admin approves
        let (_, _, mentor) = send(
            &app,
            "POST",
            "/api/auth/register-mentor",
            None,
            Some(json!({ "name": "Grace", "email": "grace@example.com", "password": "secret" })),
        )
        .await;
        let admin_cookie = login(&app, "admin@example.com").await;
        let (status, _, _) = send(
            &app,
            "PUT",
            &format!("/api/users/{}/approve-mentor", mentor["id"]),
            Some(&admin_cookie),
            Some(json!({ "isApproved": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        // student registers; mentor builds a three-chapter course
        let (_, _, student) = send(
            &app,
            "POST",
            "/api/auth/register",
            None,
            Some(json!({ "name": "Ada", "email": "ada@example.com", "password": "secret" })),
        )
        .await;
        let mentor_cookie = login(&app, "grace@example.com").await;
        let (status, _, course) = send(
            &app,
            "POST",
            "/api/courses",
            Some(&mentor_cookie),
            Some(json!({ "title": "Rust", "description": "From zero" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let course_id = course["id"].as_i64().unwrap();
        let mut chapter_ids = Vec::new();
        for order in 1..=3 {
            let (status, _, chapter) = send(
                &app,
                "POST",
                &format!("/api/courses/{course_id}/chapters"),
                Some(&mentor_cookie),
                Some(json!({
                    "title": format!("Chapter {order}"),
                    "description": "content",
                    "videoLink": format!("https://videos.example.com/{order}"),
                    "sequenceOrder": order,
                })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            chapter_ids.push(chapter["id"].as_i64().unwrap());
        }
        let (status, _, _) = send(
            &app,
            "POST",
            &format!("/api/courses/{course_id}/assign"),
            Some(&mentor_cookie),
            Some(json!({ "studentIds": [student["id"]] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        // student completes chapter 1, then tries to skip to chapter 3
        let student_cookie = login(&app, "ada@example.com").await;
        let (status, _, _) = send(
            &app,
            "POST",
            &format!("/api/progress/{}/complete", chapter_ids[0]),
            Some(&student_cookie),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _, body) = send(
            &app,
            "GET",
            &format!("/api/progress/course/{course_id}"),
            Some(&student_cookie),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let locked: Vec<bool> = body["chapters"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["isLocked"].as_bool().unwrap())
            .collect();
        assert_eq!(locked, vec![false, false, true]);

        let (status, _, body) = send(
            &app,
            "POST",
            &format!("/api/progress/{}/complete", chapter_ids[2]),
            Some(&student_cookie),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().contains("in sequence"));

        // finishing in order unlocks the certificate, idempotently
        for id in &chapter_ids[1..] {
            let (status, _, _) = send(
                &app,
                "POST",
                &format!("/api/progress/{id}/complete"),
                Some(&student_cookie),
                None,
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }
        let (status, _, first) = send(
            &app,
            "GET",
            &format!("/api/certificates/{course_id}"),
            Some(&student_cookie),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (_, _, second) = send(
            &app,
            "GET",
            &format!("/api/certificates/{course_id}"),
            Some(&student_cookie),
            None,
        )
        .await;
        assert_eq!(first["certificateNumber"], second["certificateNumber"]);

        // no session needed to verify, and the admin reports see it all
        let number = first["certificateNumber"].as_str().unwrap();
        let (status, _, verified) = send(
            &app,
            "GET",
            &format!("/api/certificates/verify/{number}"),
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(verified["certificate"]["studentName"], "Ada");

        let (status, _, summary) = send(
            &app,
            "GET",
            "/api/analytics/summary",
            Some(&admin_cookie),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary["totalCompletions"], 1);

        // analytics are admin turf
        let (status, _, _) = send(
            &app,
            "GET",
            "/api/analytics/summary",
            Some(&student_cookie),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
