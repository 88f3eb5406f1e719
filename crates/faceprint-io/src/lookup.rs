//! Resolving an identity key to who it belongs to.

use crate::backend::BackendClient;
use crate::chain::{ChainError, FallbackChain, Strategy, StrategyError};
use crate::local::validate_key;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityInfo {
    pub key: String,
    pub name: Option<String>,
    pub group: Option<String>,
    /// Strategy that produced this record.
    pub source: String,
}

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("identity {key} not found: {source}")]
    NotFound { key: String, source: ChainError },
}

#[async_trait]
pub trait IdentityLookup: Send + Sync {
    async fn lookup(&self, key: &str) -> Result<IdentityInfo, LookupError>;
}

/// Backend record shape; field names vary between backend versions.
#[derive(Debug, Deserialize)]
struct RemoteIdentity {
    #[serde(default, alias = "hoTen", alias = "fullName")]
    name: Option<String>,
    #[serde(default, alias = "maLop", alias = "className")]
    group: Option<String>,
}

fn parse_identity(key: &str, body: Value, source: &str) -> Result<IdentityInfo, StrategyError> {
    if body.is_null() {
        return Err(StrategyError::NotFound(format!("empty record for {key}")));
    }
    let remote: RemoteIdentity = serde_json::from_value(body)
        .map_err(|e| StrategyError::NotFound(format!("unrecognised record for {key}: {e}")))?;
    Ok(IdentityInfo {
        key: key.to_string(),
        name: remote.name,
        group: remote.group,
        source: source.to_string(),
    })
}

pub struct BackendLookup {
    client: Arc<BackendClient>,
    authenticated: bool,
}

impl BackendLookup {
    pub fn new(client: Arc<BackendClient>, authenticated: bool) -> Self {
        Self {
            client,
            authenticated,
        }
    }
}

#[async_trait]
impl Strategy<str, IdentityInfo> for BackendLookup {
    fn name(&self) -> &str {
        if self.authenticated {
            "backend_authenticated"
        } else {
            "backend_public"
        }
    }

    async fn attempt(&self, key: &str) -> Result<IdentityInfo, StrategyError> {
        if self.authenticated && !self.client.has_credentials() {
            return Err(StrategyError::Skipped("no credentials configured".into()));
        }
        let body = self.client.fetch_identity(key, self.authenticated).await?;
        parse_identity(key, body, self.name())
    }
}

/// Accept any key whose image directory exists.
pub struct DirectoryLookup {
    root: PathBuf,
}

impl DirectoryLookup {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Strategy<str, IdentityInfo> for DirectoryLookup {
    fn name(&self) -> &str {
        "local"
    }

    async fn attempt(&self, key: &str) -> Result<IdentityInfo, StrategyError> {
        validate_key(key).map_err(|e| StrategyError::NotFound(e.to_string()))?;
        let dir = self.root.join(key);
        if !tokio::fs::metadata(&dir).await.is_ok_and(|m| m.is_dir()) {
            return Err(StrategyError::NotFound(format!(
                "no directory at {}",
                dir.display()
            )));
        }
        tracing::warn!(identity = key, "backend could not confirm identity; directory exists");
        Ok(IdentityInfo {
            key: key.to_string(),
            name: Some(format!("Identity_{key}")),
            group: None,
            source: self.name().to_string(),
        })
    }
}

pub struct LookupChain {
    chain: FallbackChain<str, IdentityInfo>,
}

impl LookupChain {
    pub fn new(chain: FallbackChain<str, IdentityInfo>) -> Self {
        Self { chain }
    }

    /// Public endpoint, then authenticated endpoint, then the image directory.
    pub fn standard(client: Option<Arc<BackendClient>>, image_root: impl Into<PathBuf>) -> Self {
        let mut chain = FallbackChain::new();
        if let Some(client) = client {
            chain = chain
                .with(BackendLookup::new(client.clone(), false))
                .with(BackendLookup::new(client, true));
        }
        Self::new(chain.with(DirectoryLookup::new(image_root)))
    }
}

#[async_trait]
impl IdentityLookup for LookupChain {
    async fn lookup(&self, key: &str) -> Result<IdentityInfo, LookupError> {
        let resolved = self
            .chain
            .run(key)
            .await
            .map_err(|source| LookupError::NotFound {
                key: key.to_string(),
                source,
            })?;
        tracing::info!(
            identity = key,
            name = resolved.value.name.as_deref().unwrap_or("N/A"),
            via = %resolved.strategy,
            "identity resolved"
        );
        Ok(resolved.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_identity_aliases() {
        let info = parse_identity(
            "SV001",
            serde_json::json!({"maSv": "SV001", "hoTen": "Nguyen Van A", "maLop": "CNTT1"}),
            "backend_public",
        )
        .unwrap();
        assert_eq!(info.name.as_deref(), Some("Nguyen Van A"));
        assert_eq!(info.group.as_deref(), Some("CNTT1"));
        assert_eq!(info.source, "backend_public");

        let info = parse_identity("X", serde_json::json!({"name": "B", "group": "G"}), "b").unwrap();
        assert_eq!(info.name.as_deref(), Some("B"));
        assert_eq!(info.group.as_deref(), Some("G"));
    }

    #[test]
    fn test_parse_identity_null_is_not_found() {
        assert!(matches!(
            parse_identity("X", Value::Null, "b"),
            Err(StrategyError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_directory_fallback() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("SV001")).unwrap();
        let lookup = LookupChain::standard(None, root.path());

        let info = lookup.lookup("SV001").await.unwrap();
        assert_eq!(info.name.as_deref(), Some("Identity_SV001"));
        assert_eq!(info.source, "local");

        let err = lookup.lookup("SV404").await.unwrap_err();
        let LookupError::NotFound { key, source } = err;
        assert_eq!(key, "SV404");
        assert_eq!(source.failures.len(), 1);
    }

    #[tokio::test]
    async fn test_directory_fallback_refuses_escaping_keys() {
        let root = tempfile::tempdir().unwrap();
        let inner = root.path().join("students");
        std::fs::create_dir(&inner).unwrap();
        std::fs::create_dir(root.path().join("outside")).unwrap();
        let lookup = LookupChain::standard(None, &inner);

        for key in ["../outside", "..", "a/b"] {
            assert!(lookup.lookup(key).await.is_err(), "{key} resolved");
        }
    }
}
