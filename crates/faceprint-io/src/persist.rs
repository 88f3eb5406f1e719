//! Embedding persistence: backend first, local disk as the final fallback.

use crate::backend::BackendClient;
use crate::chain::{ChainError, FallbackChain, Strategy, StrategyError};
use crate::local::LocalEmbeddingStore;
use async_trait::async_trait;
use faceprint_core::Embedding;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct PersistRequest {
    pub key: String,
    pub embedding: Embedding,
    /// Extra context stored alongside local copies.
    pub metadata: Value,
}

/// Where an embedding ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistReceipt {
    pub strategy: String,
    /// URL or file path.
    pub location: String,
    /// True when only the local fallback accepted the write.
    pub degraded: bool,
}

#[derive(Error, Debug)]
#[error("failed to persist embedding for {key}: {source}")]
pub struct PersistError {
    pub key: String,
    pub source: ChainError,
}

/// Anything that can durably store a composite embedding.
#[async_trait]
pub trait EmbeddingSink: Send + Sync {
    async fn persist(&self, request: &PersistRequest) -> Result<PersistReceipt, PersistError>;
}

/// Upload through the backend REST API.
pub struct BackendUpload {
    client: Arc<BackendClient>,
    authenticated: bool,
}

impl BackendUpload {
    pub fn new(client: Arc<BackendClient>, authenticated: bool) -> Self {
        Self {
            client,
            authenticated,
        }
    }
}

#[async_trait]
impl Strategy<PersistRequest, PersistReceipt> for BackendUpload {
    fn name(&self) -> &str {
        if self.authenticated {
            "backend_authenticated"
        } else {
            "backend_public"
        }
    }

    async fn attempt(&self, request: &PersistRequest) -> Result<PersistReceipt, StrategyError> {
        if self.authenticated && !self.client.has_credentials() {
            return Err(StrategyError::Skipped("no credentials configured".into()));
        }
        self.client
            .upload_embedding(&request.key, &request.embedding, self.authenticated)
            .await?;
        Ok(PersistReceipt {
            strategy: self.name().to_string(),
            location: self.client.embedding_url(&request.key, self.authenticated),
            degraded: false,
        })
    }
}

/// Write to the local store; success here marks the result degraded.
pub struct LocalFallback {
    store: LocalEmbeddingStore,
}

impl LocalFallback {
    pub fn new(store: LocalEmbeddingStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Strategy<PersistRequest, PersistReceipt> for LocalFallback {
    fn name(&self) -> &str {
        "local_file"
    }

    async fn attempt(&self, request: &PersistRequest) -> Result<PersistReceipt, StrategyError> {
        let path = self
            .store
            .save(&request.key, &request.embedding, &request.metadata)
            .await?;
        tracing::warn!(
            identity = %request.key,
            path = %path.display(),
            "backend unreachable; embedding kept locally only"
        );
        Ok(PersistReceipt {
            strategy: self.name().to_string(),
            location: path.display().to_string(),
            degraded: true,
        })
    }
}

pub struct PersistenceChain {
    chain: FallbackChain<PersistRequest, PersistReceipt>,
}

impl PersistenceChain {
    pub fn new(chain: FallbackChain<PersistRequest, PersistReceipt>) -> Self {
        Self { chain }
    }

    /// Public endpoint, then authenticated endpoint, then local disk.
    pub fn standard(client: Option<Arc<BackendClient>>, store: LocalEmbeddingStore) -> Self {
        let mut chain = FallbackChain::new();
        if let Some(client) = client {
            chain = chain
                .with(BackendUpload::new(client.clone(), false))
                .with(BackendUpload::new(client, true));
        }
        Self::new(chain.with(LocalFallback::new(store)))
    }

    pub fn strategies(&self) -> Vec<&str> {
        self.chain.names()
    }
}

#[async_trait]
impl EmbeddingSink for PersistenceChain {
    async fn persist(&self, request: &PersistRequest) -> Result<PersistReceipt, PersistError> {
        let resolved = self.chain.run(request).await.map_err(|source| PersistError {
            key: request.key.clone(),
            source,
        })?;
        tracing::debug!(
            identity = %request.key,
            strategy = %resolved.strategy,
            skipped = resolved.failures.len(),
            "embedding persisted"
        );
        Ok(resolved.value)
    }
}
