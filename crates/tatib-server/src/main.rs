mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use tatib_api::notify::compose::Composer;
use tatib_api::notify::gateway::SimulatedGateway;
use tatib_api::photos::PhotoStore;
use tatib_api::routes;
use tatib_api::state::{AppState, AppStateInner};
use tatib_api::users::UserManager;
use tatib_db::Database;
use tatib_types::api::CreateUserRequest;
use tatib_types::models::Role;

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tatib=debug,tatib_api=debug,tatib_db=info,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = Database::open(&config.db_path)?;
    seed_admin(&db, &config)?;
    let photos = PhotoStore::new(config.upload_dir.clone()).await?;

    let state: AppState = Arc::new(AppStateInner {
        db,
        photos,
        gateway: Arc::new(SimulatedGateway),
        composer: Composer::new(config.school_name.clone(), config.utc_offset),
        jwt_secret: config.jwt_secret.clone(),
    });
    info!(
        "Notifications via {} gateway, signed as {:?}",
        state.gateway.provider_tag(),
        state.composer.school_name()
    );

    let app = routes::router(state);

    info!("Tatib server listening on {}", config.addr);
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Create the first admin account when the users table is empty.
fn seed_admin(db: &Database, config: &Config) -> Result<()> {
    if db.count_users()? > 0 {
        return Ok(());
    }
    let Some(password) = config.admin_password.as_deref() else {
        warn!("No users exist and TATIB_ADMIN_PASSWORD is unset; nobody can log in");
        return Ok(());
    };
    let admin = UserManager::new(db)
        .create(&CreateUserRequest {
            username: config.admin_username.clone(),
            password: password.to_string(),
            role: Role::Admin,
        })
        .context("refusing to seed admin account from TATIB_ADMIN_* settings")?;
    info!("Seeded admin account {}", admin.username);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    ctrl_c.await.ok();
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(admin_password: Option<&str>) -> Config {
        Config {
            addr: "127.0.0.1:0".parse().unwrap(),
            db_path: "unused.db".into(),
            upload_dir: "unused".into(),
            jwt_secret: "s3cret".into(),
            school_name: "SMA Negeri 1".into(),
            utc_offset: chrono::FixedOffset::east_opt(0).unwrap(),
            admin_username: "admin".into(),
            admin_password: admin_password.map(Into::into),
        }
    }

    #[test]
    fn seeds_admin_with_valid_password() {
        let db = Database::open_in_memory().unwrap();
        seed_admin(&db, &config(Some("admin12345"))).unwrap();
        let admin = db.get_user_by_username("admin").unwrap().unwrap();
        assert_eq!(admin.role, "admin");

        // second start leaves the existing account alone
        seed_admin(&db, &config(Some("another-password"))).unwrap();
        assert_eq!(db.count_users().unwrap(), 1);
    }

    #[test]
    fn short_admin_password_is_refused() {
        let db = Database::open_in_memory().unwrap();
        let err = seed_admin(&db, &config(Some("pendek"))).unwrap_err();
        assert!(format!("{:#}", err).contains("at least 8 characters"));
        assert_eq!(db.count_users().unwrap(), 0);
    }

    #[test]
    fn missing_password_seeds_nothing() {
        let db = Database::open_in_memory().unwrap();
        seed_admin(&db, &config(None)).unwrap();
        assert_eq!(db.count_users().unwrap(), 0);
    }
}
