//! Model worker threads.
//!
//! Analyzers are not assumed to be reentrant, so each one is owned by a
//! dedicated OS thread and driven over a channel. A model may run several
//! workers, each with its own analyzer instance.

use faceprint_core::{FaceAnalyzer, FaceCandidate, ModelError, ModelSpec};
use image::DynamicImage;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

const CHANNEL_CAPACITY: usize = 4;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("model {model}: {source}")]
    Model { model: String, source: ModelError },
    #[error("no embedding models could be loaded")]
    NoModels,
    #[error("worker for model {0} exited")]
    ChannelClosed(String),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Builds one analyzer instance. Called on the worker thread that will own it.
pub type AnalyzerFactory =
    Arc<dyn Fn() -> Result<Box<dyn FaceAnalyzer>, ModelError> + Send + Sync>;

struct DetectRequest {
    image: Arc<DynamicImage>,
    reply: oneshot::Sender<Result<Vec<FaceCandidate>, ModelError>>,
}

/// Clone-safe handle to a model's workers.
#[derive(Clone)]
pub struct ModelHandle {
    spec: Arc<ModelSpec>,
    workers: Arc<[mpsc::Sender<DetectRequest>]>,
    next: Arc<AtomicUsize>,
}

impl ModelHandle {
    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Run detection on the next worker in round-robin order.
    pub async fn detect(&self, image: Arc<DynamicImage>) -> Result<Vec<FaceCandidate>, EngineError> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.workers[idx]
            .send(DetectRequest {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed(self.spec.id.clone()))?;

        reply_rx
            .await
            .map_err(|_| EngineError::ChannelClosed(self.spec.id.clone()))?
            .map_err(|source| EngineError::Model {
                model: self.spec.id.clone(),
                source,
            })
    }
}

/// Spawn `workers` threads for one model and wait until all have built
/// their analyzer.
///
/// The worker count is clamped to `1..=available_parallelism`. If any
/// worker fails to initialise, the already-started ones shut down when the
/// returned error drops their channels.
pub async fn spawn_model(
    spec: ModelSpec,
    workers: usize,
    factory: AnalyzerFactory,
) -> Result<ModelHandle, EngineError> {
    let max_workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let count = workers.clamp(1, max_workers);

    let mut senders = Vec::with_capacity(count);
    let mut ready = Vec::with_capacity(count);

    for i in 0..count {
        let (tx, mut rx) = mpsc::channel::<DetectRequest>(CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), ModelError>>();
        let factory = factory.clone();
        let model_id = spec.id.clone();

        std::thread::Builder::new()
            .name(format!("model-{}-{i}", spec.id))
            .spawn(move || {
                let mut analyzer = match factory() {
                    Ok(analyzer) => {
                        let _ = ready_tx.send(Ok(()));
                        analyzer
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                tracing::debug!(model = %model_id, worker = i, "model worker started");
                while let Some(req) = rx.blocking_recv() {
                    let result = analyzer.analyze(&req.image);
                    let _ = req.reply.send(result);
                }
                tracing::debug!(model = %model_id, worker = i, "model worker exiting");
            })?;

        senders.push(tx);
        ready.push(ready_rx);
    }

    for ready_rx in ready {
        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(source)) => {
                return Err(EngineError::Model {
                    model: spec.id.clone(),
                    source,
                })
            }
            Err(_) => return Err(EngineError::ChannelClosed(spec.id.clone())),
        }
    }

    tracing::info!(
        model = %spec.id,
        weight = spec.weight,
        dimension = spec.dimension,
        workers = count,
        "model loaded"
    );

    Ok(ModelHandle {
        spec: Arc::new(spec),
        workers: senders.into(),
        next: Arc::new(AtomicUsize::new(0)),
    })
}

/// A model to load: its spec, how many workers, and how to build analyzers.
pub struct ModelEntry {
    pub spec: ModelSpec,
    pub workers: usize,
    pub factory: AnalyzerFactory,
}

/// The ensemble: every model that loaded, in configuration order.
#[derive(Clone)]
pub struct ModelRegistry {
    models: Vec<ModelHandle>,
}

impl ModelRegistry {
    /// Load every entry. Individual failures are logged and skipped;
    /// losing all of them is fatal.
    pub async fn load(entries: Vec<ModelEntry>) -> Result<Self, EngineError> {
        let mut models = Vec::with_capacity(entries.len());
        for entry in entries {
            let id = entry.spec.id.clone();
            match spawn_model(entry.spec, entry.workers, entry.factory).await {
                Ok(handle) => models.push(handle),
                Err(e) => tracing::warn!(model = %id, error = %e, "model unavailable; continuing without it"),
            }
        }

        if models.is_empty() {
            return Err(EngineError::NoModels);
        }
        Ok(Self { models })
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelHandle> {
        self.models.iter()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.models.iter().map(|m| m.id().to_string()).collect()
    }
}
