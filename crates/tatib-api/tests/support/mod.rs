#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::FixedOffset;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt; // for `app.oneshot()`

use tatib_api::auth::{create_token, hash_password};
use tatib_api::notify::compose::Composer;
use tatib_api::notify::gateway::SimulatedGateway;
use tatib_api::photos::PhotoStore;
use tatib_api::routes;
use tatib_api::state::{AppState, AppStateInner};
use tatib_db::Database;
use tatib_types::models::Role;

pub const JWT_SECRET: &str = "test-secret";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub admin_token: String,
    pub teacher_token: String,
    pub teacher_id: i64,
    _uploads: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        let uploads = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();

        let admin_id = db.create_user("admin", &hash_password("admin12345").unwrap(), "admin").unwrap();
        let teacher_id = db.create_user("guru1", &hash_password("guru12345").unwrap(), "teacher").unwrap();

        let state: AppState = Arc::new(AppStateInner {
            db,
            photos: PhotoStore::new(uploads.path().to_path_buf()).await.unwrap(),
            gateway: Arc::new(SimulatedGateway),
            composer: Composer::new("SMA Negeri 1 Contoh", FixedOffset::east_opt(0).unwrap()),
            jwt_secret: JWT_SECRET.to_string(),
        });

        Self {
            router: routes::router(state.clone()),
            admin_token: create_token(JWT_SECRET, admin_id, "admin", Role::Admin).unwrap(),
            teacher_token: create_token(JWT_SECRET, teacher_id, "guru1", Role::Teacher).unwrap(),
            teacher_id,
            state,
            _uploads: uploads,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = self.router.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// Raw response body, for binary endpoints.
    pub async fn get_bytes(&self, uri: &str) -> (StatusCode, Vec<u8>) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    pub async fn as_teacher(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.request(method, uri, Some(self.teacher_token.as_str()), body).await
    }

    pub async fn create_ahmad(&self) -> i64 {
        let (status, body) = self
            .as_teacher(
                Method::POST,
                "/students",
                Some(serde_json::json!({
                    "nisn": "1234567890",
                    "name": "Ahmad Budi",
                    "class": "12 IPA 1",
                    "parent_name": "Budi Santoso",
                    "parent_whatsapp": "081234567890"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["id"].as_i64().unwrap()
    }

    pub async fn create_late_violation(&self, student_id: i64, time: &str) -> Value {
        let (status, body) = self
            .as_teacher(
                Method::POST,
                "/violations",
                Some(serde_json::json!({
                    "student_id": student_id,
                    "violation_type": "Terlambat",
                    "location": "Gerbang Sekolah",
                    "violation_time": time
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body
    }
}

pub fn jpeg_data_url(len: usize) -> (Vec<u8>, String) {
    let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0];
    bytes.resize(len.max(4), 0x2A);
    let url = format!("data:image/jpeg;base64,{}", B64.encode(&bytes));
    (bytes, url)
}
