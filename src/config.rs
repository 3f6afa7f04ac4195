use std::{env, fmt::Display, str::FromStr, time::Duration};

use axum::http::{HeaderValue, Uri};
use thiserror::Error;
use tracing::{info, warn};

/// One year; longer dashboard sessions are refused at startup.
const MAX_SESSION_TTL_MINUTES: i64 = 60 * 24 * 365;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {key} value {value:?}: {reason}")]
    Invalid {
        key:    &'static str,
        value:  String,
        reason: String,
    },

    #[error("SHEET_URL environment variable is not set")]
    MissingSheetUrl,
}

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub sheet_url: Option<Uri>,
    pub dashboard_username: String,
    pub dashboard_password: Option<String>,
    pub session_ttl: chrono::Duration,
    pub gateway_timeout: Duration,
    pub cors_origin: Option<HeaderValue>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let sheet_url = match lookup("SHEET_URL") {
            Some(raw) => Some(parse_sheet_url(&raw)?),
            None => {
                warn!("SHEET_URL not set, lead routes will answer with a configuration error");
                None
            }
        };

        let dashboard_password = lookup("DASHBOARD_PASSWORD");
        if dashboard_password.is_none() {
            warn!("DASHBOARD_PASSWORD not set, dashboard login is disabled");
        }

        let cors_origin = match lookup("CORS_ALLOW_ORIGIN") {
            Some(origin) => Some(HeaderValue::from_str(&origin).map_err(|e| ConfigError::Invalid {
                key:    "CORS_ALLOW_ORIGIN",
                value:  origin.clone(),
                reason: e.to_string(),
            })?),
            None => None,
        };

        let session_minutes: i64 = try_load(&lookup, "SESSION_TTL_MINUTES", "480")?;
        let timeout_secs:    u64 = try_load(&lookup, "GATEWAY_TIMEOUT_SECS", "10")?;

        Ok(Self {
            port: try_load(&lookup, "PORT", "3000")?,
            sheet_url,
            dashboard_username: lookup("DASHBOARD_USERNAME").unwrap_or_else(|| "admin".to_string()),
            dashboard_password,
            session_ttl: session_ttl(session_minutes)?,
            gateway_timeout: Duration::from_secs(timeout_secs.max(1)),
            cors_origin,
        })
    }
}

fn try_load<T, F>(lookup: &F, key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: raw.clone(),
        reason: e.to_string(),
    })
}

fn session_ttl(minutes: i64) -> Result<chrono::Duration, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        key:   "SESSION_TTL_MINUTES",
        value: minutes.to_string(),
        reason,
    };

    if minutes > MAX_SESSION_TTL_MINUTES {
        return Err(invalid(format!("must be at most {MAX_SESSION_TTL_MINUTES} minutes")));
    }
    chrono::Duration::try_minutes(minutes.max(1)).ok_or_else(|| invalid("out of range".to_string()))
}

fn parse_sheet_url(raw: &str) -> Result<Uri, ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        key:    "SHEET_URL",
        value:  raw.to_string(),
        reason: reason.to_string(),
    };

    let uri: Uri = raw.trim().parse().map_err(|e: axum::http::uri::InvalidUri| invalid(&e.to_string()))?;
    match uri.scheme_str() {
        Some("http") | Some("https") if uri.authority().is_some() => Ok(uri),
        _ => Err(invalid("expected an absolute http(s) URL")),
    }
}
