//! Process configuration from environment variables

use std::path::PathBuf;

use crate::error::{ApiError, Result};

const DEFAULT_JWT_SECRET: &str = "a-very-secret-key-that-should-be-changed";

/// Everything the daemon reads from its environment, resolved once at
/// startup and passed down by value.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen port (`PORT`, default 8080)
    pub port: u16,
    /// SQLite catalogue file (`DATABASE_PATH`)
    pub database_path: PathBuf,
    /// Root of all instance working trees (`SERVER_DATA_BASE`)
    pub server_data_base: PathBuf,
    /// Root of all backup archives (`BACKUP_PATH`)
    pub backup_path: PathBuf,
    /// JWT signing key (`JWT_SECRET`)
    pub jwt_secret: String,
    /// `APP_ENV`; cookies are marked `Secure` when `production`
    pub app_env: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let port = env_or("PORT", "8080")
            .parse()
            .map_err(|e| ApiError::Internal(format!("invalid PORT: {e}")))?;

        let jwt_secret = env_or("JWT_SECRET", DEFAULT_JWT_SECRET);
        if jwt_secret == DEFAULT_JWT_SECRET {
            tracing::warn!("JWT_SECRET not provided, using an insecure default");
        }

        Ok(Config {
            port,
            database_path: env_or("DATABASE_PATH", "./ender.db").into(),
            server_data_base: env_or("SERVER_DATA_BASE", "./server-data").into(),
            backup_path: env_or("BACKUP_PATH", "./backups").into(),
            jwt_secret,
            app_env: env_or("APP_ENV", "development"),
        })
    }

    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }
}

fn env_or(key: &str, fallback: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| fallback.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        // Environment-variable free assertions only; the test runner may
        // set PORT itself.
        let config = Config {
            port: 8080,
            database_path: "./ender.db".into(),
            server_data_base: "./server-data".into(),
            backup_path: "./backups".into(),
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            app_env: "development".to_string(),
        };
        assert!(!config.is_production());
    }

    #[test]
    fn test_production_flag() {
        let config = Config {
            port: 8080,
            database_path: "./ender.db".into(),
            server_data_base: "./server-data".into(),
            backup_path: "./backups".into(),
            jwt_secret: "secret".to_string(),
            app_env: "production".to_string(),
        };
        assert!(config.is_production());
    }
}
