use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Authentication required")]
    MissingToken,

    #[error("Session expired or signed out")]
    InvalidToken,

    #[error("DASHBOARD_PASSWORD environment variable is not set")]
    LoginDisabled,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token:      String,
    pub expires_at: DateTime<Utc>,
}

/// Identity boundary for the dashboard.
pub trait Authenticator: Send + Sync {
    fn is_authenticated(&self, token: &str) -> bool;
    fn login(&self, username: &str, password: &str) -> Result<Session, AuthError>;
    /// Returns whether a live session was revoked.
    fn logout(&self, token: &str) -> bool;
}

/// Configured single dashboard account with in-memory bearer tokens.
pub struct SessionAuth {
    username: String,
    password: Option<String>,
    ttl:      Duration,
    sessions: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl SessionAuth {
    pub fn new(username: impl Into<String>, password: Option<String>, ttl: Duration) -> Self {
        Self {
            username: username.into(),
            password,
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.dashboard_username.clone(),
            config.dashboard_password.clone(),
            config.session_ttl,
        )
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn login_at(&self, username: &str, password: &str, now: DateTime<Utc>) -> Result<Session, AuthError> {
        let expected = self.password.as_deref().ok_or(AuthError::LoginDisabled)?;

        // both comparisons always run
        let user_ok = same_bytes(username.as_bytes(), self.username.as_bytes());
        let pass_ok = same_bytes(password.as_bytes(), expected.as_bytes());
        if !(user_ok & pass_ok) {
            warn!("dashboard login rejected");
            return Err(AuthError::InvalidCredentials);
        }

        let token      = Uuid::new_v4().simple().to_string();
        let expires_at = now.checked_add_signed(self.ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut sessions = self.sessions();
        sessions.retain(|_, expiry| *expiry > now);
        sessions.insert(token.clone(), expires_at);

        info!("dashboard session opened for {username}");
        Ok(Session { token, expires_at })
    }

    fn is_authenticated_at(&self, token: &str, now: DateTime<Utc>) -> bool {
        let mut sessions = self.sessions();
        match sessions.get(token).copied() {
            Some(expiry) if expiry > now => true,
            Some(_) => {
                sessions.remove(token);
                false
            }
            None => false,
        }
    }
}

impl Authenticator for SessionAuth {
    fn is_authenticated(&self, token: &str) -> bool {
        self.is_authenticated_at(token, Utc::now())
    }

    fn login(&self, username: &str, password: &str) -> Result<Session, AuthError> {
        self.login_at(username, password, Utc::now())
    }

    fn logout(&self, token: &str) -> bool {
        let revoked = self.sessions().remove(token).is_some();
        if revoked {
            info!("dashboard session closed");
        }
        revoked
    }
}

fn same_bytes(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    left.iter().zip(right).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> SessionAuth {
        SessionAuth::new("admin", Some("hunter2".to_string()), Duration::minutes(30))
    }

    #[test]
    fn login_issues_a_token_that_authenticates() {
        let auth    = auth();
        let session = auth.login("admin", "hunter2").unwrap();

        assert_eq!(session.token.len(), 32);
        assert!(auth.is_authenticated(&session.token));
        assert!(!auth.is_authenticated("not-a-token"));
    }

    #[test]
    fn wrong_credentials_are_rejected() {
        let auth = auth();
        assert_eq!(auth.login("admin", "hunter3"), Err(AuthError::InvalidCredentials));
        assert_eq!(auth.login("root", "hunter2"), Err(AuthError::InvalidCredentials));
        assert_eq!(auth.login("admin", ""), Err(AuthError::InvalidCredentials));
    }

    #[test]
    fn login_is_disabled_without_a_password() {
        let auth = SessionAuth::new("admin", None, Duration::minutes(30));
        assert_eq!(auth.login("admin", ""), Err(AuthError::LoginDisabled));
    }

    #[test]
    fn logout_revokes_the_token() {
        let auth    = auth();
        let session = auth.login("admin", "hunter2").unwrap();

        assert!(auth.logout(&session.token));
        assert!(!auth.is_authenticated(&session.token));
        assert!(!auth.logout(&session.token));
    }

    #[test]
    fn sessions_expire_after_the_ttl() {
        let auth    = auth();
        let start   = Utc::now();
        let session = auth.login_at("admin", "hunter2", start).unwrap();

        assert_eq!(session.expires_at, start + Duration::minutes(30));
        assert!(auth.is_authenticated_at(&session.token, start + Duration::minutes(29)));
        assert!(!auth.is_authenticated_at(&session.token, start + Duration::minutes(31)));
        // pruned on the failed check
        assert!(!auth.is_authenticated_at(&session.token, start));
    }

    #[test]
    fn oversized_ttl_saturates_instead_of_overflowing() {
        let auth    = SessionAuth::new("admin", Some("hunter2".to_string()), Duration::days(36_500_000));
        let session = auth.login("admin", "hunter2").unwrap();

        assert_eq!(session.expires_at, DateTime::<Utc>::MAX_UTC);
        assert!(auth.is_authenticated(&session.token));
    }
}
