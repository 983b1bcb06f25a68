use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use tatib_db::Database;
use tatib_types::api::{Claims, CreateUserRequest};
use tatib_types::models::User;

use crate::auth::hash_password;
use crate::error::{AppError, AppResult};
use crate::middleware::require_admin;
use crate::state::{AppState, blocking};

/// Account administration. Passwords never leave this module unhashed and
/// never come back out at all.
pub struct UserManager<'a> {
    db: &'a Database,
}

impl<'a> UserManager<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn create(&self, req: &CreateUserRequest) -> AppResult<User> {
        let username = req.username.trim();
        if username.len() < 3 || username.len() > 32 {
            return Err(AppError::InvalidInput("Username must be 3-32 characters".into()));
        }
        if req.password.len() < 8 {
            return Err(AppError::InvalidInput("Password must be at least 8 characters".into()));
        }

        if self.db.get_user_by_username(username)?.is_some() {
            return Err(AppError::Conflict(format!("Username already taken: {}", username)));
        }

        let password_hash = hash_password(&req.password)?;
        let conflict = format!("Username already taken: {}", username);
        let id = self
            .db
            .create_user(username, &password_hash, req.role.as_str())
            .map_err(|e| AppError::from_store(e, &conflict, &conflict))?;

        info!("Created {} account {} (id {})", req.role, username, id);
        self.get(id)?
            .ok_or_else(|| AppError::Dependency(anyhow::anyhow!("user {} vanished after insert", id)))
    }

    pub fn get(&self, id: i64) -> AppResult<Option<User>> {
        Ok(self.db.get_user_by_id(id)?.map(User::from))
    }

    pub fn list(&self) -> AppResult<Vec<User>> {
        Ok(self.db.list_users()?.into_iter().map(User::from).collect())
    }

    /// Delete an account. The acting admin cannot delete themselves, and
    /// accounts referenced as a violation reporter are kept.
    pub fn delete(&self, acting_user: i64, id: i64) -> AppResult<()> {
        if acting_user == id {
            return Err(AppError::InvalidInput("Cannot delete your own account".into()));
        }
        if self.db.get_user_by_id(id)?.is_none() {
            return Err(AppError::NotFound(format!("User not found: {}", id)));
        }
        if self.db.count_violations_reported_by(id)? > 0 {
            return Err(AppError::Conflict(
                "Cannot delete user with reported violations".into(),
            ));
        }

        let conflict = "Cannot delete user with reported violations";
        self.db
            .delete_user(id)
            .map_err(|e| AppError::from_store(e, conflict, conflict))?;
        info!("Deleted user {}", id);
        Ok(())
    }
}

// -- Handlers --

pub async fn list_users(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
) -> AppResult<impl IntoResponse> {
    let users = blocking(&state, |s| UserManager::new(&s.db).list()).await?;
    Ok(Json(users))
}

pub async fn create_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateUserRequest>,
) -> AppResult<impl IntoResponse> {
    require_admin(&claims)?;
    let user = blocking(&state, move |s| UserManager::new(&s.db).create(&req)).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> AppResult<impl IntoResponse> {
    require_admin(&claims)?;
    blocking(&state, move |s| UserManager::new(&s.db).delete(claims.sub, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tatib_types::models::Role;

    fn request(username: &str, role: Role) -> CreateUserRequest {
        CreateUserRequest {
            username: username.into(),
            password: "rahasia123".into(),
            role,
        }
    }

    #[test]
    fn duplicate_username_conflicts() {
        let db = Database::open_in_memory().unwrap();
        let users = UserManager::new(&db);
        let created = users.create(&request("guru1", Role::Teacher)).unwrap();
        assert_eq!(created.password, "");

        let err = users.create(&request("guru1", Role::Admin)).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn short_password_rejected() {
        let db = Database::open_in_memory().unwrap();
        let mut req = request("guru1", Role::Teacher);
        req.password = "pendek".into();
        assert!(matches!(
            UserManager::new(&db).create(&req),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn cannot_delete_self_or_missing() {
        let db = Database::open_in_memory().unwrap();
        let users = UserManager::new(&db);
        let admin = users.create(&request("admin", Role::Admin)).unwrap();
        assert!(matches!(users.delete(admin.id, admin.id), Err(AppError::InvalidInput(_))));
        assert!(matches!(users.delete(admin.id, 999), Err(AppError::NotFound(_))));

        let teacher = users.create(&request("guru1", Role::Teacher)).unwrap();
        users.delete(admin.id, teacher.id).unwrap();
        assert!(users.get(teacher.id).unwrap().is_none());
    }
}
