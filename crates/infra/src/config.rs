//! Configuration loading and representation.
//!
//! Values come from the process environment. A `.env` file in the working
//! directory is loaded first when present; real environment variables win.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use villabook_observability::{LogConfig, LogFormat};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    /// Outside production, notifications are sent in sandbox mode.
    pub fn sandbox_notifications(self) -> bool {
        self != AppEnv::Production
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// Deadline applied to every store call.
    pub query_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailConfig {
    pub from_address: String,
    pub from_name: String,
    /// `None` selects the log-only sender.
    pub sendgrid_api_key: Option<String>,
    pub invitation_template: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub env: AppEnv,
    pub database: DatabaseConfig,
    pub mail: MailConfig,
    pub log: LogConfig,
    /// Base URL of the client; activation links are `{client_url}/confirm/{token}`.
    pub client_url: String,
    pub invitation_ttl: chrono::Duration,
    /// Lifetime of the claims issued at sign-in.
    pub token_ttl: chrono::Duration,
    pub upload_dir: PathBuf,
}

impl AppConfig {
    /// Load `.env` (if any), then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let env = match get("APP_ENV").as_deref() {
            None | Some("development") => AppEnv::Development,
            Some("production") => AppEnv::Production,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "APP_ENV",
                    reason: format!("expected 'development' or 'production', got '{other}'"),
                });
            }
        };

        let database = DatabaseConfig {
            url: get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?,
            max_connections: parse_or("DATABASE_MAX_CONNECTIONS", get("DATABASE_MAX_CONNECTIONS"), 10)?,
            query_timeout: Duration::from_millis(parse_or(
                "DATABASE_QUERY_TIMEOUT_MS",
                get("DATABASE_QUERY_TIMEOUT_MS"),
                5_000u64,
            )?),
        };

        let mail = MailConfig {
            from_address: get("MAIL_FROM").unwrap_or_else(|| "no-reply@villabook.local".to_string()),
            from_name: get("MAIL_FROM_NAME").unwrap_or_else(|| "Villabook".to_string()),
            sendgrid_api_key: get("SENDGRID_API_KEY"),
            invitation_template: get("MAIL_INVITATION_TEMPLATE")
                .unwrap_or_else(|| "user_invitation".to_string()),
        };

        let format = match get("LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "LOG_FORMAT",
                    reason: format!("expected 'text' or 'json', got '{other}'"),
                });
            }
        };

        let invitation_ttl = positive_hours("INVITATION_TTL_HOURS", get("INVITATION_TTL_HOURS"), 72)?;
        let token_ttl = positive_hours("AUTH_TOKEN_TTL_HOURS", get("AUTH_TOKEN_TTL_HOURS"), 24)?;

        Ok(Self {
            env,
            database,
            mail,
            log: LogConfig {
                level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
                format,
            },
            client_url: get("CLIENT_URL")
                .unwrap_or_else(|| "http://localhost:5173".to_string())
                .trim_end_matches('/')
                .to_string(),
            invitation_ttl,
            token_ttl,
            upload_dir: get("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("uploads")),
        })
    }
}

fn positive_hours(name: &'static str, raw: Option<String>, default: i64) -> Result<chrono::Duration, ConfigError> {
    let hours: i64 = parse_or(name, raw, default)?;
    if hours <= 0 {
        return Err(ConfigError::Invalid {
            name,
            reason: "must be positive".to_string(),
        });
    }
    Ok(chrono::Duration::hours(hours))
}

fn parse_or<T>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: core::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
    }
}
