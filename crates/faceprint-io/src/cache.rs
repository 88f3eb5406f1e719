//! Telling the recognition service its cached features are stale.

use crate::backend::BackendError;
use crate::retry::{with_retry, RetryPolicy};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinSet;

/// Fire-and-forget notification after an identity's embedding changes.
pub trait CacheNotifier: Send + Sync {
    fn notify(&self, key: &str);
}

pub struct HttpCacheInvalidator {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
    /// In-flight notifications, drained before shutdown.
    pending: Mutex<JoinSet<()>>,
}

impl HttpCacheInvalidator {
    pub fn new(face_api_url: impl Into<String>, retry: RetryPolicy) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(retry.timeout)
            .build()
            .map_err(|e| BackendError::Client(e.to_string()))?;
        Ok(Self {
            http,
            base_url: face_api_url.into().trim_end_matches('/').to_string(),
            retry,
            pending: Mutex::new(JoinSet::new()),
        })
    }

    pub fn url_for(&self, key: &str) -> String {
        format!("{}/api/v1/features/extract/{key}", self.base_url)
    }

    /// Notifications that have not finished yet.
    pub fn pending(&self) -> usize {
        self.tasks().len()
    }

    /// Wait up to `grace` for in-flight notifications. Returns how many were
    /// still running when the grace period ran out; those are aborted.
    pub async fn drain(&self, grace: Duration) -> usize {
        let mut tasks = std::mem::take(&mut *self.tasks());
        if tasks.is_empty() {
            return 0;
        }

        tracing::debug!(pending = tasks.len(), "waiting for cache invalidations");
        let finished = tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if finished.is_ok() {
            return 0;
        }
        let abandoned = tasks.len();
        tracing::warn!(abandoned, ?grace, "cache invalidations still running at shutdown");
        tasks.abort_all();
        abandoned
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CacheNotifier for HttpCacheInvalidator {
    /// Spawns a background task; failures are logged, never returned.
    fn notify(&self, key: &str) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(identity = key, "no async runtime; cache invalidation skipped");
            return;
        };

        let http = self.http.clone();
        let url = self.url_for(key);
        let retry = self.retry;
        let key = key.to_string();
        let task = async move {
            let result = with_retry(&retry, "cache_invalidate", || async {
                let response = http.post(&url).send().await?;
                let status = response.status();
                if status.is_success() {
                    Ok(())
                } else {
                    Err(BackendError::Status {
                        status: status.as_u16(),
                        body: response.text().await.unwrap_or_default(),
                    })
                }
            })
            .await;

            match result {
                Ok(()) => tracing::info!(identity = %key, "feature cache refreshed"),
                Err(e) => tracing::warn!(identity = %key, error = %e, "feature cache refresh failed"),
            }
        };

        let mut tasks = self.tasks();
        while tasks.try_join_next().is_some() {}
        tasks.spawn_on(task, &runtime);
    }
}
