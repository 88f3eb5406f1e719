//! faceprint-pipeline — Model workers and per-identity orchestration.
//!
//! Owns the loaded embedding models, runs each identity's photos through
//! them, and drives batches of identities with bounded concurrency.

pub mod batch;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod report;

#[cfg(test)]
mod testutil;

pub use batch::{process_all, BatchConfig, BatchReport, ModelStats};
pub use engine::{spawn_model, AnalyzerFactory, EngineError, ModelEntry, ModelHandle, ModelRegistry};
pub use error::{IdentityError, IdentityStatus};
pub use pipeline::{
    Collaborators, IdentityPipeline, PipelineConfig, DEFAULT_MIN_FACE_SIZE, DEFAULT_QUALITY_FLOOR,
};
pub use report::{
    AttemptStatus, EmbeddingSummary, IdentityReport, ImageDiagnostics, ImageStatus, ModelAttempt,
    QualityDistribution,
};
