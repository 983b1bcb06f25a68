use std::sync::Arc;

use tatib_db::Database;
use tracing::error;

use crate::error::{AppError, AppResult};
use crate::notify::compose::Composer;
use crate::notify::gateway::MessagingGateway;
use crate::photos::PhotoStore;

pub type AppState = Arc<AppStateInner>;

/// Everything a request needs, built once in `main` and shared through
/// axum `State`.
pub struct AppStateInner {
    pub db: Database,
    pub photos: PhotoStore,
    pub gateway: Arc<dyn MessagingGateway>,
    pub composer: Composer,
    pub jwt_secret: String,
}

/// Run blocking database work off the async runtime.
pub async fn blocking<F, T>(state: &AppState, f: F) -> AppResult<T>
where
    F: FnOnce(&AppStateInner) -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            AppError::Dependency(anyhow::anyhow!("background task failed: {}", e))
        })?
}
