//! Database row types. These map directly to SQLite rows.
//! Conversions into the tatib-types API models live here as well.
use tatib_types::models::{Role, Student, User, Violation};
use tracing::warn;

use crate::parse_timestamp;

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct StudentRow {
    pub id: i64,
    pub nisn: String,
    pub name: String,
    pub class: String,
    pub parent_name: String,
    pub parent_whatsapp: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct ViolationRow {
    pub id: i64,
    pub student_id: i64,
    pub violation_type: String,
    pub location: String,
    pub description: Option<String>,
    pub photo_url: Option<String>,
    pub violation_time: String,
    pub reported_by: i64,
    pub whatsapp_sent: bool,
    pub whatsapp_sent_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Column values for a student insert.
pub struct NewStudent<'a> {
    pub nisn: &'a str,
    pub name: &'a str,
    pub class: &'a str,
    pub parent_name: &'a str,
    pub parent_whatsapp: &'a str,
}

/// Column values for a violation insert. Notification state always starts
/// unsent.
pub struct NewViolation<'a> {
    pub student_id: i64,
    pub violation_type: &'a str,
    pub location: &'a str,
    pub description: Option<&'a str>,
    pub photo_url: Option<&'a str>,
    pub violation_time: &'a str,
    pub reported_by: i64,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        let role = row.role.parse().unwrap_or_else(|e| {
            warn!("{} on user {}, treating as teacher", e, row.id);
            Role::Teacher
        });
        Self {
            id: row.id,
            username: row.username,
            password: String::new(),
            role,
            created_at: parse_timestamp(&row.created_at),
            updated_at: parse_timestamp(&row.updated_at),
        }
    }
}

impl From<StudentRow> for Student {
    fn from(row: StudentRow) -> Self {
        Self {
            id: row.id,
            nisn: row.nisn,
            name: row.name,
            class: row.class,
            parent_name: row.parent_name,
            parent_whatsapp: row.parent_whatsapp,
            created_at: parse_timestamp(&row.created_at),
            updated_at: parse_timestamp(&row.updated_at),
        }
    }
}

impl From<ViolationRow> for Violation {
    fn from(row: ViolationRow) -> Self {
        Self {
            id: row.id,
            student_id: row.student_id,
            violation_type: row.violation_type,
            location: row.location,
            description: row.description,
            photo_url: row.photo_url,
            violation_time: parse_timestamp(&row.violation_time),
            reported_by: row.reported_by,
            whatsapp_sent: row.whatsapp_sent,
            whatsapp_sent_at: row.whatsapp_sent_at.as_deref().map(parse_timestamp),
            created_at: parse_timestamp(&row.created_at),
            updated_at: parse_timestamp(&row.updated_at),
        }
    }
}
