// src/config.rs
use std::env;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Runtime settings read from the environment (and `.env` via dotenvy).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_expires_in_hours: i64,
    pub db_max_connections: u32,
    pub frontend_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;

        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
            tracing::warn!("JWT_SECRET not set, falling back to an insecure development secret");
            "default_secret".to_string()
        });

        Ok(Self {
            database_url,
            port: parse_var("PORT", 5000)?,
            jwt_secret,
            jwt_expires_in_hours: parse_var("JWT_EXPIRES_IN_HOURS", 24 * 7)?,
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", 5)?,
            frontend_url: env::var("FRONTEND_URL").ok().filter(|url| !url.is_empty()),
        })
    }

    /// Origins allowed by CORS: the configured frontend plus any local dev server.
    pub fn is_allowed_origin(&self, origin: &str) -> bool {
        if let Some(frontend) = &self.frontend_url {
            if origin == frontend.trim_end_matches('/') {
                return true;
            }
        }
        is_local_origin(origin)
    }
}

fn parse_var<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => value
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { key, value }),
        _ => Ok(default),
    }
}

fn is_local_origin(origin: &str) -> bool {
    ["http://localhost:", "http://127.0.0.1:"].iter().any(|prefix| {
        origin
            .strip_prefix(prefix)
            .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(frontend_url: Option<&str>) -> AppConfig {
        AppConfig {
            database_url: "postgres://localhost/test".to_string(),
            port: 5000,
            jwt_secret: "secret".to_string(),
            jwt_expires_in_hours: 24,
            db_max_connections: 1,
            frontend_url: frontend_url.map(str::to_string),
        }
    }

    #[test]
    fn test_local_dev_origins_are_allowed() {
        let cfg = config(None);
        assert!(cfg.is_allowed_origin("http://localhost:5173"));
        assert!(cfg.is_allowed_origin("http://127.0.0.1:3000"));
        assert!(!cfg.is_allowed_origin("http://localhost:"));
        assert!(!cfg.is_allowed_origin("http://localhost:80/evil"));
        assert!(!cfg.is_allowed_origin("https://example.com"));
    }

    #[test]
    fn test_frontend_url_is_allowed() {
        let cfg = config(Some("https://app.example.org/"));
        assert!(cfg.is_allowed_origin("https://app.example.org"));
        assert!(!cfg.is_allowed_origin("https://other.example.org"));
    }
}
