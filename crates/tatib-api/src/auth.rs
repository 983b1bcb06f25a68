use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::info;

use tatib_db::Database;
use tatib_types::api::{Claims, LoginRequest, LoginResponse};
use tatib_types::models::{Role, User};

use crate::error::{AppError, AppResult};
use crate::state::{AppState, blocking};

const TOKEN_LIFETIME_DAYS: i64 = 7;

/// Hash a password with Argon2id.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();
    Ok(hash)
}

/// Check a username/password pair. Unknown user and wrong password are
/// indistinguishable to the caller.
pub fn verify_credentials(db: &Database, username: &str, password: &str) -> AppResult<User> {
    let user = db
        .get_user_by_username(username)?
        .ok_or(AppError::Unauthorized)?;

    let parsed_hash = PasswordHash::new(&user.password_hash)
        .map_err(|e| anyhow::anyhow!("stored hash for {} unreadable: {}", user.username, e))?;

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| AppError::Unauthorized)?;

    Ok(User::from(user))
}

pub fn create_token(secret: &str, user_id: i64, username: &str, role: Role) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        role,
        exp: (chrono::Utc::now() + chrono::Duration::days(TOKEN_LIFETIME_DAYS)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> AppResult<impl IntoResponse> {
    let response = blocking(&state, move |s| {
        let user = verify_credentials(&s.db, &req.username, &req.password)?;
        let token = create_token(&s.jwt_secret, user.id, &user.username, user.role)?;
        info!("User {} logged in", user.username);
        Ok(LoginResponse { user, token })
    })
    .await?;

    Ok(Json(response))
}
