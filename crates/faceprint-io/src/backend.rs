//! Backend REST client: identity lookup and embedding upload.

use crate::retry::{with_retry, RetryPolicy};
use crate::session::{Credentials, SessionHandle};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use faceprint_core::Embedding;
use reqwest::header::{ACCEPT, COOKIE};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = concat!("faceprint/", env!("CARGO_PKG_VERSION"));

#[derive(Error, Debug, Clone)]
pub enum BackendError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("session rejected by backend")]
    Unauthorized,
    #[error("no credentials configured")]
    NoCredentials,
    #[error("login failed: {0}")]
    LoginFailed(String),
    #[error("HTTP client setup failed: {0}")]
    Client(String),
}

impl BackendError {
    /// Worth retrying: connection problems, timeouts and server-side errors.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Network(_) | BackendError::Timeout => true,
            BackendError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout
        } else {
            BackendError::Network(err.to_string())
        }
    }
}

/// Path templates under the backend base URL; `{key}` is the identity key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEndpoints {
    pub login: String,
    pub identity: String,
    pub public_embedding: String,
    pub auth_embedding: String,
}

impl Default for BackendEndpoints {
    fn default() -> Self {
        Self {
            login: "/auth/login".into(),
            identity: "/students/by-code/{key}".into(),
            public_embedding: "/python/students/{key}/embedding".into(),
            auth_embedding: "/students/{key}/embedding".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub credentials: Option<Credentials>,
    pub endpoints: BackendEndpoints,
    pub retry: RetryPolicy,
    pub session_ttl: Duration,
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            credentials: None,
            endpoints: BackendEndpoints::default(),
            retry: RetryPolicy::default(),
            session_ttl: Duration::from_secs(30 * 60),
        }
    }
}

pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    endpoints: BackendEndpoints,
    session: SessionHandle,
    retry: RetryPolicy,
}

impl BackendClient {
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.retry.timeout)
            .build()
            .map_err(|e| BackendError::Client(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            endpoints: config.endpoints,
            session: SessionHandle::new(config.credentials, config.session_ttl),
            retry: config.retry,
        })
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn has_credentials(&self) -> bool {
        self.session.has_credentials()
    }

    /// Log in eagerly, e.g. to check connectivity at startup.
    pub async fn login(&self) -> Result<(), BackendError> {
        self.session
            .refresh(&self.http, &self.url(&self.endpoints.login))
            .await
            .map(|_| ())
    }

    pub fn identity_url(&self, key: &str) -> String {
        self.url(&render(&self.endpoints.identity, key))
    }

    pub fn embedding_url(&self, key: &str, authenticated: bool) -> String {
        let template = if authenticated {
            &self.endpoints.auth_embedding
        } else {
            &self.endpoints.public_embedding
        };
        self.url(&render(template, key))
    }

    /// Fetch the backend's record for an identity.
    pub async fn fetch_identity(&self, key: &str, authenticated: bool) -> Result<Value, BackendError> {
        let url = self.identity_url(key);
        with_retry(&self.retry, "fetch_identity", || {
            self.request(Method::GET, &url, None, authenticated)
        })
        .await
    }

    /// Upload a composite embedding as base64-encoded little-endian f32s.
    pub async fn upload_embedding(
        &self,
        key: &str,
        embedding: &Embedding,
        authenticated: bool,
    ) -> Result<(), BackendError> {
        let url = self.embedding_url(key, authenticated);
        let body = serde_json::json!({ "embedding": encode_embedding(embedding) });
        with_retry(&self.retry, "upload_embedding", || async {
            self.request(Method::POST, &url, Some(&body), authenticated)
                .await
                .map(|_| ())
        })
        .await?;

        tracing::info!(identity = key, authenticated, "embedding uploaded to backend");
        Ok(())
    }

    /// One request; an authenticated 401 expires the session and retries once.
    async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        authenticated: bool,
    ) -> Result<Value, BackendError> {
        let response = self.send(method.clone(), url, body, authenticated).await?;
        if authenticated && response.status() == StatusCode::UNAUTHORIZED {
            tracing::info!(url, "session rejected; refreshing");
            self.session.expire().await;
            let retried = self.send(method, url, body, authenticated).await?;
            return read_body(retried).await;
        }
        read_body(response).await
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        authenticated: bool,
    ) -> Result<reqwest::Response, BackendError> {
        let mut request = self
            .http
            .request(method, url)
            .header(ACCEPT, "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }
        if authenticated {
            let login_url = self.url(&self.endpoints.login);
            let cookie = self.session.acquire(&self.http, &login_url).await?;
            request = request.header(COOKIE, cookie);
        }
        Ok(request.send().await?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Map status codes to errors; non-JSON success bodies come back as strings.
async fn read_body(response: reqwest::Response) -> Result<Value, BackendError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(BackendError::Unauthorized);
    }

    let text = response.text().await?;
    if !status.is_success() {
        return Err(BackendError::Status {
            status: status.as_u16(),
            body: text,
        });
    }

    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

fn render(template: &str, key: &str) -> String {
    template.replace("{key}", key)
}

/// Base64 of the vector's little-endian f32 bytes.
pub fn encode_embedding(embedding: &Embedding) -> String {
    let bytes: Vec<u8> = embedding
        .values
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect();
    STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_embedding_little_endian() {
        let e = Embedding::new(vec![1.0, -2.5], "composite");
        let decoded = STANDARD.decode(encode_embedding(&e)).unwrap();
        assert_eq!(decoded.len(), 8);
        assert_eq!(f32::from_le_bytes(decoded[0..4].try_into().unwrap()), 1.0);
        assert_eq!(f32::from_le_bytes(decoded[4..8].try_into().unwrap()), -2.5);
    }

    #[test]
    fn test_transient_classification() {
        assert!(BackendError::Network("x".into()).is_transient());
        assert!(BackendError::Timeout.is_transient());
        assert!(BackendError::Status { status: 502, body: String::new() }.is_transient());
        assert!(!BackendError::Status { status: 404, body: String::new() }.is_transient());
        assert!(!BackendError::Unauthorized.is_transient());
        assert!(!BackendError::NoCredentials.is_transient());
    }

    #[test]
    fn test_endpoint_urls() {
        let client = BackendClient::new(BackendConfig::new("http://localhost:8080/api/")).unwrap();
        assert_eq!(
            client.identity_url("SV001"),
            "http://localhost:8080/api/students/by-code/SV001"
        );
        assert_eq!(
            client.embedding_url("SV001", false),
            "http://localhost:8080/api/python/students/SV001/embedding"
        );
        assert_eq!(
            client.embedding_url("SV001", true),
            "http://localhost:8080/api/students/SV001/embedding"
        );
    }

    #[tokio::test]
    async fn test_authenticated_call_without_credentials_fails() {
        let client = BackendClient::new(BackendConfig::new("http://127.0.0.1:9")).unwrap();
        assert!(!client.has_credentials());
        let err = client.fetch_identity("SV001", true).await.unwrap_err();
        assert!(matches!(err, BackendError::NoCredentials));
    }
}
