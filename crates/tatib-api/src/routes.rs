use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::middleware::require_auth;
use crate::notify::dispatch;
use crate::state::AppState;
use crate::{auth, photos, students, users, violations};

/// Room for a 5 MB image once base64-encoded inside a JSON body.
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/login", post(auth::login))
        .route("/uploads/{file_name}", get(photos::serve_photo))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/users", get(users::list_users).post(users::create_user))
        .route("/users/{id}", axum::routing::delete(users::delete_user))
        .route("/students", get(students::list_students).post(students::create_student))
        .route("/students/bulk", post(students::create_students_bulk))
        .route(
            "/students/{id}",
            get(students::get_student)
                .put(students::update_student)
                .delete(students::delete_student),
        )
        .route("/students/{id}/violations", get(violations::student_violations))
        .route("/violations", get(violations::list_violations).post(violations::create_violation))
        .route("/violations/stats", get(violations::violation_stats))
        .route(
            "/violations/{id}",
            get(violations::get_violation)
                .put(violations::update_violation)
                .delete(violations::delete_violation),
        )
        .route("/violations/{id}/whatsapp/preview", get(dispatch::preview_whatsapp))
        .route("/violations/{id}/whatsapp/mark-sent", post(dispatch::mark_whatsapp_sent))
        .route("/whatsapp/send", post(dispatch::send_whatsapp))
        .route("/photos", post(photos::upload_photo))
        .route("/photos/validate", post(photos::validate_photo))
        .route("/photos/thumbnail", post(photos::thumbnail_photo))
        .route("/photos/{file_name}", axum::routing::delete(photos::delete_photo))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}
