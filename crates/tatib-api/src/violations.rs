use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use tatib_db::models::NewViolation;
use tatib_db::{Database, now, timestamp};
use tatib_types::api::{
    Claims, CreateViolationRequest, UpdateViolationRequest, ViolationFilter, ViolationStats,
    ViolationTypeCount,
};
use tatib_types::models::Violation;

use crate::error::{AppError, AppResult};
use crate::state::{AppState, blocking};

/// Page size used when a listing does not ask for one.
pub const DEFAULT_LIST_LIMIT: u32 = 1000;

/// Violation records: CRUD plus the filtered history views.
///
/// Existence checks on the referenced student and reporter run before each
/// write so the caller gets a precise error; the store's foreign keys are
/// what actually guarantees integrity under concurrent writes.
pub struct ViolationManager<'a> {
    db: &'a Database,
}

impl<'a> ViolationManager<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn create(&self, input: &CreateViolationRequest) -> AppResult<Violation> {
        let reported_by = input
            .reported_by
            .ok_or_else(|| AppError::InvalidInput("reported_by is required".into()))?;
        if input.violation_type.trim().is_empty() {
            return Err(AppError::InvalidInput("violation_type must not be empty".into()));
        }
        if input.location.trim().is_empty() {
            return Err(AppError::InvalidInput("location must not be empty".into()));
        }

        self.require_student(input.student_id)?;
        if self.db.get_user_by_id(reported_by)?.is_none() {
            return Err(AppError::NotFound(format!("User not found: {}", reported_by)));
        }

        let violation_time = timestamp(input.violation_time);
        let id = self
            .db
            .insert_violation(&NewViolation {
                student_id: input.student_id,
                violation_type: input.violation_type.trim(),
                location: input.location.trim(),
                description: non_empty(input.description.as_deref()),
                photo_url: non_empty(input.photo_url.as_deref()),
                violation_time: &violation_time,
                reported_by,
            })
            .map_err(|e| {
                AppError::from_store(e, "Violation already exists", "Student or reporting user not found")
            })?;

        info!(
            "Recorded violation {} ({}) for student {}",
            id, input.violation_type, input.student_id
        );
        self.get(id)?
            .ok_or_else(|| AppError::Dependency(anyhow::anyhow!("violation {} vanished after insert", id)))
    }

    pub fn get(&self, id: i64) -> AppResult<Option<Violation>> {
        Ok(self.db.get_violation(id)?.map(Violation::from))
    }

    /// Most recent incident first. An unknown `student_id` yields an empty
    /// list rather than an error.
    pub fn list(&self, filter: &ViolationFilter) -> AppResult<Vec<Violation>> {
        let rows = self.db.list_violations(
            filter.student_id,
            filter.limit.unwrap_or(DEFAULT_LIST_LIMIT),
            filter.offset.unwrap_or(0),
        )?;
        Ok(rows.into_iter().map(Violation::from).collect())
    }

    /// Like `list` for one student, except that an unknown student is an
    /// error.
    pub fn list_by_student(&self, student_id: i64) -> AppResult<Vec<Violation>> {
        self.require_student(student_id)?;
        self.list(&ViolationFilter {
            student_id: Some(student_id),
            ..Default::default()
        })
    }

    /// Apply only the supplied fields.
    ///
    /// Setting `whatsapp_sent` to true stamps `whatsapp_sent_at` with the
    /// current time, even when it was already set; false clears the stamp.
    pub fn update(&self, id: i64, input: UpdateViolationRequest) -> AppResult<Violation> {
        if let Some(student_id) = input.student_id {
            self.require_student(student_id)?;
        }
        if input.violation_type.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(AppError::InvalidInput("violation_type must not be empty".into()));
        }
        if input.location.as_deref().is_some_and(|l| l.trim().is_empty()) {
            return Err(AppError::InvalidInput("location must not be empty".into()));
        }

        let row = self
            .db
            .update_violation(id, |row| {
                if let Some(student_id) = input.student_id {
                    row.student_id = student_id;
                }
                if let Some(violation_type) = input.violation_type {
                    row.violation_type = violation_type.trim().to_string();
                }
                if let Some(location) = input.location {
                    row.location = location.trim().to_string();
                }
                if let Some(description) = input.description {
                    row.description = non_empty(description.as_deref()).map(str::to_string);
                }
                if let Some(photo_url) = input.photo_url {
                    row.photo_url = non_empty(photo_url.as_deref()).map(str::to_string);
                }
                if let Some(violation_time) = input.violation_time {
                    row.violation_time = timestamp(violation_time);
                }
                match input.whatsapp_sent {
                    Some(true) => {
                        row.whatsapp_sent = true;
                        row.whatsapp_sent_at = Some(now());
                    }
                    Some(false) => {
                        row.whatsapp_sent = false;
                        row.whatsapp_sent_at = None;
                    }
                    None => {}
                }
            })
            .map_err(|e| AppError::from_store(e, "Violation already exists", "Student not found"))?
            .ok_or_else(|| AppError::NotFound(format!("Violation not found: {}", id)))?;

        Ok(Violation::from(row))
    }

    pub fn delete(&self, id: i64) -> AppResult<()> {
        if !self.db.delete_violation(id)? {
            return Err(AppError::NotFound(format!("Violation not found: {}", id)));
        }
        info!("Deleted violation {}", id);
        Ok(())
    }

    pub fn stats(&self) -> AppResult<ViolationStats> {
        let (total, notified) = self.db.violation_counts()?;
        let by_type = self
            .db
            .violation_type_counts()?
            .into_iter()
            .map(|(violation_type, count)| ViolationTypeCount {
                violation_type,
                count: count.max(0) as u64,
            })
            .collect();
        Ok(ViolationStats {
            total: total.max(0) as u64,
            notified: notified.max(0) as u64,
            pending_notification: (total - notified).max(0) as u64,
            by_type,
        })
    }

    fn require_student(&self, student_id: i64) -> AppResult<()> {
        if self.db.get_student(student_id)?.is_none() {
            return Err(AppError::NotFound(format!("Student not found: {}", student_id)));
        }
        Ok(())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

// -- Handlers --

pub async fn list_violations(
    State(state): State<AppState>,
    Query(filter): Query<ViolationFilter>,
    Extension(_claims): Extension<Claims>,
) -> AppResult<impl IntoResponse> {
    let violations = blocking(&state, move |s| ViolationManager::new(&s.db).list(&filter)).await?;
    Ok(Json(violations))
}

pub async fn create_violation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(mut req): Json<CreateViolationRequest>,
) -> AppResult<impl IntoResponse> {
    req.reported_by.get_or_insert(claims.sub);
    let violation = blocking(&state, move |s| ViolationManager::new(&s.db).create(&req)).await?;
    Ok((StatusCode::CREATED, Json(violation)))
}

pub async fn get_violation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Extension(_claims): Extension<Claims>,
) -> AppResult<impl IntoResponse> {
    let violation = blocking(&state, move |s| ViolationManager::new(&s.db).get(id))
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Violation not found: {}", id)))?;
    Ok(Json(violation))
}

pub async fn update_violation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Extension(_claims): Extension<Claims>,
    Json(req): Json<UpdateViolationRequest>,
) -> AppResult<impl IntoResponse> {
    let violation = blocking(&state, move |s| ViolationManager::new(&s.db).update(id, req)).await?;
    Ok(Json(violation))
}

pub async fn delete_violation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Extension(_claims): Extension<Claims>,
) -> AppResult<impl IntoResponse> {
    blocking(&state, move |s| ViolationManager::new(&s.db).delete(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn student_violations(
    State(state): State<AppState>,
    Path(student_id): Path<i64>,
    Extension(_claims): Extension<Claims>,
) -> AppResult<impl IntoResponse> {
    let violations =
        blocking(&state, move |s| ViolationManager::new(&s.db).list_by_student(student_id)).await?;
    Ok(Json(violations))
}

pub async fn violation_stats(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
) -> AppResult<impl IntoResponse> {
    let stats = blocking(&state, |s| ViolationManager::new(&s.db).stats()).await?;
    Ok(Json(stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tatib_db::models::NewStudent;

    struct Fixture {
        db: Database,
        student: i64,
        teacher: i64,
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let student = db
            .create_student(&NewStudent {
                nisn: "1234567890",
                name: "Ahmad Budi",
                class: "12 IPA 1",
                parent_name: "Budi Santoso",
                parent_whatsapp: "081234567890",
            })
            .unwrap();
        let teacher = db.create_user("guru1", "hash", "teacher").unwrap();
        Fixture { db, student, teacher }
    }

    fn late_at(f: &Fixture, day: u32) -> CreateViolationRequest {
        CreateViolationRequest {
            student_id: f.student,
            violation_type: "Terlambat".into(),
            location: "Gerbang Sekolah".into(),
            description: None,
            photo_url: None,
            violation_time: Utc.with_ymd_and_hms(2024, 1, day, 7, 30, 0).unwrap(),
            reported_by: Some(f.teacher),
        }
    }

    fn assert_sent_invariant(v: &Violation) {
        assert_eq!(v.whatsapp_sent, v.whatsapp_sent_at.is_some(), "violation {}", v.id);
    }

    #[test]
    fn create_starts_unsent() {
        let f = fixture();
        let v = ViolationManager::new(&f.db).create(&late_at(&f, 15)).unwrap();
        assert!(!v.whatsapp_sent);
        assert_sent_invariant(&v);
        assert_eq!(v.violation_time, Utc.with_ymd_and_hms(2024, 1, 15, 7, 30, 0).unwrap());
        assert_eq!(v.created_at, v.updated_at);
    }

    #[test]
    fn create_names_the_missing_reference() {
        let f = fixture();
        let manager = ViolationManager::new(&f.db);

        let mut req = late_at(&f, 15);
        req.student_id = 404;
        assert!(matches!(manager.create(&req), Err(AppError::NotFound(m)) if m.contains("Student")));

        let mut req = late_at(&f, 15);
        req.reported_by = Some(404);
        assert!(matches!(manager.create(&req), Err(AppError::NotFound(m)) if m.contains("User")));
    }

    #[test]
    fn get_missing_is_none() {
        let f = fixture();
        assert!(ViolationManager::new(&f.db).get(1).unwrap().is_none());
    }

    #[test]
    fn unknown_student_list_is_empty_but_list_by_student_fails() {
        let f = fixture();
        let manager = ViolationManager::new(&f.db);
        manager.create(&late_at(&f, 15)).unwrap();

        let filter = ViolationFilter { student_id: Some(404), ..Default::default() };
        assert!(manager.list(&filter).unwrap().is_empty());
        assert!(matches!(manager.list_by_student(404), Err(AppError::NotFound(_))));
        assert_eq!(manager.list_by_student(f.student).unwrap().len(), 1);
    }

    #[test]
    fn list_orders_by_incident_time_not_creation() {
        let f = fixture();
        let manager = ViolationManager::new(&f.db);
        let first_recorded = manager.create(&late_at(&f, 20)).unwrap();
        let second_recorded = manager.create(&late_at(&f, 10)).unwrap();
        let third_recorded = manager.create(&late_at(&f, 15)).unwrap();

        let ids: Vec<i64> = manager
            .list(&ViolationFilter::default())
            .unwrap()
            .iter()
            .map(|v| v.id)
            .collect();
        assert_eq!(ids, vec![first_recorded.id, third_recorded.id, second_recorded.id]);
    }

    #[test]
    fn partial_update_touches_only_supplied_fields() {
        let f = fixture();
        let manager = ViolationManager::new(&f.db);
        let mut req = late_at(&f, 15);
        req.description = Some("Datang 30 menit".into());
        let original = manager.create(&req).unwrap();

        let updated = manager
            .update(
                original.id,
                UpdateViolationRequest {
                    location: Some("Kantin".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.location, "Kantin");
        assert_eq!(updated.violation_type, original.violation_type);
        assert_eq!(updated.description, original.description);
        assert_eq!(updated.violation_time, original.violation_time);
        assert!(!updated.whatsapp_sent);
        assert!(updated.updated_at >= original.updated_at);

        let cleared = manager
            .update(
                original.id,
                UpdateViolationRequest {
                    description: Some(None),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(cleared.description, None);
        assert_eq!(cleared.location, "Kantin");
    }

    #[test]
    fn update_whatsapp_sent_stamps_time() {
        let f = fixture();
        let manager = ViolationManager::new(&f.db);
        let v = manager.create(&late_at(&f, 15)).unwrap();

        let sent = manager
            .update(v.id, UpdateViolationRequest { whatsapp_sent: Some(true), ..Default::default() })
            .unwrap();
        assert!(sent.whatsapp_sent);
        assert_sent_invariant(&sent);
        assert_eq!(sent.location, v.location);

        let unsent = manager
            .update(v.id, UpdateViolationRequest { whatsapp_sent: Some(false), ..Default::default() })
            .unwrap();
        assert_sent_invariant(&unsent);
        assert!(!unsent.whatsapp_sent);
    }

    #[test]
    fn resending_through_update_refreshes_timestamp() {
        let f = fixture();
        let manager = ViolationManager::new(&f.db);
        let v = manager.create(&late_at(&f, 15)).unwrap();
        let sent = || UpdateViolationRequest { whatsapp_sent: Some(true), ..Default::default() };

        let first = manager.update(v.id, sent()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = manager.update(v.id, sent()).unwrap();

        assert_sent_invariant(&second);
        assert!(second.whatsapp_sent_at.unwrap() > first.whatsapp_sent_at.unwrap());

        // untouched flag leaves the stamp alone
        let relocated = manager
            .update(v.id, UpdateViolationRequest { location: Some("Kantin".into()), ..Default::default() })
            .unwrap();
        assert_eq!(relocated.whatsapp_sent_at, second.whatsapp_sent_at);
    }

    #[test]
    fn update_rejects_unknown_ids() {
        let f = fixture();
        let manager = ViolationManager::new(&f.db);
        assert!(matches!(
            manager.update(404, UpdateViolationRequest::default()),
            Err(AppError::NotFound(m)) if m.contains("Violation")
        ));

        let v = manager.create(&late_at(&f, 15)).unwrap();
        assert!(matches!(
            manager.update(v.id, UpdateViolationRequest { student_id: Some(404), ..Default::default() }),
            Err(AppError::NotFound(m)) if m.contains("Student")
        ));
    }

    #[test]
    fn delete_missing_fails_then_succeeds() {
        let f = fixture();
        let manager = ViolationManager::new(&f.db);
        assert!(matches!(manager.delete(404), Err(AppError::NotFound(_))));

        let v = manager.create(&late_at(&f, 15)).unwrap();
        manager.delete(v.id).unwrap();
        assert!(manager.get(v.id).unwrap().is_none());
    }

    #[test]
    fn stats_count_pending_notifications() {
        let f = fixture();
        let manager = ViolationManager::new(&f.db);
        let v = manager.create(&late_at(&f, 15)).unwrap();
        manager.create(&late_at(&f, 16)).unwrap();
        f.db.mark_whatsapp_sent(v.id, &now()).unwrap();

        let stats = manager.stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.notified, 1);
        assert_eq!(stats.pending_notification, 1);
        assert_eq!(stats.by_type[0].violation_type, "Terlambat");
        assert_eq!(stats.by_type[0].count, 2);
    }
}
