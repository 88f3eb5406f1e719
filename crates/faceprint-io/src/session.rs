//! Authenticated session handle for the backend.
//!
//! The session cookie has an explicit lifecycle: acquired by logging in on
//! first use, reused until its TTL lapses, refreshed on demand, and expired
//! when the backend rejects it.

use crate::backend::BackendError;
use reqwest::header::{HeaderMap, SET_COOKIE};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

struct SessionState {
    cookie: String,
    acquired_at: Instant,
}

/// Owns credentials and the current session cookie, if any.
pub struct SessionHandle {
    credentials: Option<Credentials>,
    ttl: Duration,
    state: Mutex<Option<SessionState>>,
}

impl SessionHandle {
    pub fn new(credentials: Option<Credentials>, ttl: Duration) -> Self {
        Self {
            credentials,
            ttl,
            state: Mutex::new(None),
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    /// True while a cookie is held and younger than the TTL.
    pub async fn is_active(&self) -> bool {
        self.state
            .lock()
            .await
            .as_ref()
            .is_some_and(|s| s.acquired_at.elapsed() < self.ttl)
    }

    /// Current cookie, logging in first if there is none or it has expired.
    pub async fn acquire(
        &self,
        http: &reqwest::Client,
        login_url: &str,
    ) -> Result<String, BackendError> {
        let mut state = self.state.lock().await;
        if let Some(current) = state.as_ref() {
            if current.acquired_at.elapsed() < self.ttl {
                return Ok(current.cookie.clone());
            }
            tracing::debug!("session TTL elapsed; logging in again");
        }

        let cookie = self.login(http, login_url).await?;
        *state = Some(SessionState {
            cookie: cookie.clone(),
            acquired_at: Instant::now(),
        });
        Ok(cookie)
    }

    /// Drop the current cookie and log in again.
    pub async fn refresh(
        &self,
        http: &reqwest::Client,
        login_url: &str,
    ) -> Result<String, BackendError> {
        self.expire().await;
        self.acquire(http, login_url).await
    }

    pub async fn expire(&self) {
        *self.state.lock().await = None;
    }

    async fn login(&self, http: &reqwest::Client, login_url: &str) -> Result<String, BackendError> {
        let creds = self.credentials.as_ref().ok_or(BackendError::NoCredentials)?;

        let response = http
            .post(login_url)
            .json(&serde_json::json!({
                "username": creds.username,
                "password": creds.password,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(user = %creds.username, %status, body = %body, "login failed");
            return Err(BackendError::LoginFailed(format!("HTTP {status}")));
        }

        let cookie = collect_cookies(response.headers());
        if cookie.is_empty() {
            return Err(BackendError::LoginFailed(
                "response carried no session cookie".into(),
            ));
        }

        tracing::info!(user = %creds.username, "login successful, session established");
        Ok(cookie)
    }
}

/// Fold `Set-Cookie` headers into one `Cookie` header value.
fn collect_cookies(headers: &HeaderMap) -> String {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .collect::<Vec<_>>()
        .join("; ")
}
