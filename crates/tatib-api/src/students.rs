use std::collections::HashSet;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use tatib_db::Database;
use tatib_db::models::NewStudent;
use tatib_types::api::{
    BulkCreateStudentsRequest, BulkCreateStudentsResponse, Claims, CreateStudentRequest,
    StudentQuery, UpdateStudentRequest,
};
use tatib_types::models::Student;

use crate::error::{AppError, AppResult};
use crate::state::{AppState, blocking};

pub struct StudentManager<'a> {
    db: &'a Database,
}

impl<'a> StudentManager<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn create(&self, req: &CreateStudentRequest) -> AppResult<Student> {
        validate(req)?;
        if self.db.get_student_by_nisn(req.nisn.trim())?.is_some() {
            return Err(duplicate_nisn(req.nisn.trim()));
        }

        let id = self
            .db
            .create_student(&new_student(req))
            .map_err(|e| AppError::from_store(e, &nisn_message(req.nisn.trim()), "Student not found"))?;

        info!("Created student {} ({})", req.name.trim(), req.nisn.trim());
        self.require(id)
    }

    /// All-or-nothing import. Duplicates within the batch or against stored
    /// students reject the whole batch.
    pub fn create_bulk(&self, reqs: &[CreateStudentRequest]) -> AppResult<Vec<Student>> {
        if reqs.is_empty() {
            return Err(AppError::InvalidInput("No students to import".into()));
        }

        let mut seen = HashSet::new();
        for req in reqs {
            validate(req)?;
            let nisn = req.nisn.trim();
            if !seen.insert(nisn) || self.db.get_student_by_nisn(nisn)?.is_some() {
                return Err(duplicate_nisn(nisn));
            }
        }

        let rows: Vec<NewStudent<'_>> = reqs.iter().map(new_student).collect();
        let ids = self
            .db
            .create_students(&rows)
            .map_err(|e| AppError::from_store(e, "Duplicate NISN in import", "Student not found"))?;

        info!("Imported {} students", ids.len());
        ids.into_iter().map(|id| self.require(id)).collect()
    }

    pub fn get(&self, id: i64) -> AppResult<Option<Student>> {
        Ok(self.db.get_student(id)?.map(Student::from))
    }

    pub fn list(&self, query: &StudentQuery) -> AppResult<Vec<Student>> {
        let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let rows = self.db.list_students(query.class.as_deref(), search)?;
        Ok(rows.into_iter().map(Student::from).collect())
    }

    pub fn update(&self, id: i64, req: UpdateStudentRequest) -> AppResult<Student> {
        if let Some(nisn) = req.nisn.as_deref().map(str::trim) {
            if nisn.is_empty() {
                return Err(AppError::InvalidInput("NISN must not be empty".into()));
            }
            if let Some(other) = self.db.get_student_by_nisn(nisn)? {
                if other.id != id {
                    return Err(duplicate_nisn(nisn));
                }
            }
        }
        if req.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(AppError::InvalidInput("Name must not be empty".into()));
        }

        let conflict = req.nisn.as_deref().map(nisn_message).unwrap_or_default();
        let row = self
            .db
            .update_student(id, |row| {
                if let Some(nisn) = req.nisn {
                    row.nisn = nisn.trim().to_string();
                }
                if let Some(name) = req.name {
                    row.name = name.trim().to_string();
                }
                if let Some(class) = req.class {
                    row.class = class.trim().to_string();
                }
                if let Some(parent_name) = req.parent_name {
                    row.parent_name = parent_name;
                }
                if let Some(parent_whatsapp) = req.parent_whatsapp {
                    row.parent_whatsapp = parent_whatsapp;
                }
            })
            .map_err(|e| AppError::from_store(e, &conflict, "Student not found"))?
            .ok_or_else(|| AppError::NotFound(format!("Student not found: {}", id)))?;

        Ok(Student::from(row))
    }

    /// Students with recorded violations cannot be deleted; there is no
    /// cascade.
    pub fn delete(&self, id: i64) -> AppResult<()> {
        if self.db.get_student(id)?.is_none() {
            return Err(AppError::NotFound(format!("Student not found: {}", id)));
        }
        let referenced = "Cannot delete student with existing violations";
        if self.db.count_violations_for_student(id)? > 0 {
            return Err(AppError::Conflict(referenced.into()));
        }
        self.db
            .delete_student(id)
            .map_err(|e| AppError::from_store(e, referenced, referenced))?;
        info!("Deleted student {}", id);
        Ok(())
    }

    fn require(&self, id: i64) -> AppResult<Student> {
        self.get(id)?
            .ok_or_else(|| AppError::Dependency(anyhow::anyhow!("student {} vanished after insert", id)))
    }
}

fn validate(req: &CreateStudentRequest) -> AppResult<()> {
    if req.nisn.trim().is_empty() {
        return Err(AppError::InvalidInput("NISN must not be empty".into()));
    }
    if req.name.trim().is_empty() {
        return Err(AppError::InvalidInput("Name must not be empty".into()));
    }
    if req.class.trim().is_empty() {
        return Err(AppError::InvalidInput("Class must not be empty".into()));
    }
    Ok(())
}

fn new_student(req: &CreateStudentRequest) -> NewStudent<'_> {
    NewStudent {
        nisn: req.nisn.trim(),
        name: req.name.trim(),
        class: req.class.trim(),
        parent_name: req.parent_name.trim(),
        parent_whatsapp: req.parent_whatsapp.trim(),
    }
}

fn nisn_message(nisn: &str) -> String {
    format!("NISN already registered: {}", nisn.trim())
}

fn duplicate_nisn(nisn: &str) -> AppError {
    AppError::Conflict(nisn_message(nisn))
}

// -- Handlers --

pub async fn list_students(
    State(state): State<AppState>,
    Query(query): Query<StudentQuery>,
    Extension(_claims): Extension<Claims>,
) -> AppResult<impl IntoResponse> {
    let students = blocking(&state, move |s| StudentManager::new(&s.db).list(&query)).await?;
    Ok(Json(students))
}

pub async fn create_student(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
    Json(req): Json<CreateStudentRequest>,
) -> AppResult<impl IntoResponse> {
    let student = blocking(&state, move |s| StudentManager::new(&s.db).create(&req)).await?;
    Ok((StatusCode::CREATED, Json(student)))
}

pub async fn create_students_bulk(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
    Json(req): Json<BulkCreateStudentsRequest>,
) -> AppResult<impl IntoResponse> {
    let students =
        blocking(&state, move |s| StudentManager::new(&s.db).create_bulk(&req.students)).await?;
    Ok((
        StatusCode::CREATED,
        Json(BulkCreateStudentsResponse {
            created: students.len(),
            students,
        }),
    ))
}

pub async fn get_student(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Extension(_claims): Extension<Claims>,
) -> AppResult<impl IntoResponse> {
    let student = blocking(&state, move |s| StudentManager::new(&s.db).get(id))
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Student not found: {}", id)))?;
    Ok(Json(student))
}

pub async fn update_student(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Extension(_claims): Extension<Claims>,
    Json(req): Json<UpdateStudentRequest>,
) -> AppResult<impl IntoResponse> {
    let student = blocking(&state, move |s| StudentManager::new(&s.db).update(id, req)).await?;
    Ok(Json(student))
}

pub async fn delete_student(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Extension(_claims): Extension<Claims>,
) -> AppResult<impl IntoResponse> {
    blocking(&state, move |s| StudentManager::new(&s.db).delete(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
