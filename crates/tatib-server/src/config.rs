use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::FixedOffset;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub upload_dir: PathBuf,
    pub jwt_secret: String,
    pub school_name: String,
    pub utc_offset: FixedOffset,
    pub admin_username: String,
    pub admin_password: Option<String>,
}

impl Config {
    /// Read configuration from `TATIB_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.into());

        let jwt_secret = lookup("TATIB_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("TATIB_JWT_SECRET is unset or still a placeholder; set it in .env and restart");
        }

        let host = var_or("TATIB_HOST", "0.0.0.0");
        let port: u16 = var_or("TATIB_PORT", "3000")
            .parse()
            .context("TATIB_PORT must be a port number")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .context("TATIB_HOST/TATIB_PORT do not form a socket address")?;

        let offset_hours: i32 = var_or("TATIB_UTC_OFFSET_HOURS", "0")
            .parse()
            .context("TATIB_UTC_OFFSET_HOURS must be a whole number of hours")?;
        let utc_offset = FixedOffset::east_opt(offset_hours * 3600)
            .with_context(|| format!("UTC offset out of range: {}", offset_hours))?;

        Ok(Self {
            addr,
            db_path: var_or("TATIB_DB_PATH", "tatib.db").into(),
            upload_dir: var_or("TATIB_UPLOAD_DIR", "./uploads").into(),
            jwt_secret,
            school_name: var_or("TATIB_SCHOOL_NAME", "SMA Negeri 1"),
            utc_offset,
            admin_username: var_or("TATIB_ADMIN_USERNAME", "admin"),
            admin_password: lookup("TATIB_ADMIN_PASSWORD").filter(|p| !p.is_empty()),
        })
    }
}
