use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::models::{Role, Student, User};

/// Distinguishes an absent field from an explicit `null`:
/// missing → `None`, `null` → `Some(None)`, value → `Some(Some(v))`.
fn double_option<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Deserialize::deserialize(de).map(Some)
}

// -- JWT Claims --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub username: String,
    pub role: Role,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user: User,
    pub token: String,
}

// -- Users --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    pub role: Role,
}

// -- Students --

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateStudentRequest {
    pub nisn: String,
    pub name: String,
    pub class: String,
    pub parent_name: String,
    pub parent_whatsapp: String,
}

/// Partial update: only the supplied fields change.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateStudentRequest {
    pub nisn: Option<String>,
    pub name: Option<String>,
    pub class: Option<String>,
    pub parent_name: Option<String>,
    pub parent_whatsapp: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StudentQuery {
    pub class: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BulkCreateStudentsRequest {
    pub students: Vec<CreateStudentRequest>,
}

#[derive(Debug, Serialize)]
pub struct BulkCreateStudentsResponse {
    pub created: usize,
    pub students: Vec<Student>,
}

// -- Violations --

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateViolationRequest {
    pub student_id: i64,
    pub violation_type: String,
    pub location: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
    pub violation_time: DateTime<Utc>,
    /// Defaults to the authenticated user when omitted over HTTP.
    #[serde(default)]
    pub reported_by: Option<i64>,
}

/// Partial update of a violation. `description` and `photo_url` accept an
/// explicit `null` to clear the stored value.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateViolationRequest {
    pub student_id: Option<i64>,
    pub violation_type: Option<String>,
    pub location: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub photo_url: Option<Option<String>>,
    pub violation_time: Option<DateTime<Utc>>,
    pub whatsapp_sent: Option<bool>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct ViolationFilter {
    pub student_id: Option<i64>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ViolationTypeCount {
    pub violation_type: String,
    pub count: u64,
}

#[derive(Debug, Serialize)]
pub struct ViolationStats {
    pub total: u64,
    pub notified: u64,
    pub pending_notification: u64,
    pub by_type: Vec<ViolationTypeCount>,
}

// -- WhatsApp --

#[derive(Debug, Serialize)]
pub struct WhatsAppPreview {
    pub message: String,
    pub recipient: String,
    pub student_name: String,
    pub violation_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendWhatsAppRequest {
    pub violation_id: i64,
    pub phone_number: String,
    pub message: String,
}

/// Outcome of a send attempt. Failures are reported here rather than as an
/// HTTP error so callers can tell a gateway failure from a bad request.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct SendWhatsAppResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendWhatsAppResponse {
    pub fn sent(message_id: String) -> Self {
        Self {
            success: true,
            message_id: Some(message_id),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkSentRequest {
    pub message_id: Option<String>,
}

// -- Photos --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UploadPhotoRequest {
    pub file_data: String,
    pub file_name: String,
}

#[derive(Debug, Serialize)]
pub struct UploadPhotoResponse {
    pub url: String,
    pub file_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PhotoDataRequest {
    pub file_data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhotoValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ThumbnailResponse {
    pub file_data: String,
}
