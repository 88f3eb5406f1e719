//! faceprint-core — Embedding quality scoring, ensemble fusion and validation.
//!
//! Turns per-image face detections from several embedding models into a
//! single L2-normalized identity embedding, and decides whether the set of
//! images it came from is consistent enough to trust.

pub mod aggregate;
pub mod fusion;
pub mod model;
pub mod quality;
pub mod selector;
pub mod types;
pub mod validator;

mod vector;

pub use aggregate::{AggregateError, CompositeAggregator};
pub use fusion::{EnsembleFuser, FusionPolicy};
pub use model::{FaceAnalyzer, ModelError, ModelSpec};
pub use quality::{ImageQualityScorer, QualityMetrics};
pub use selector::{FaceCandidateSelector, Selection};
pub use types::{
    BoundingBox, Embedding, FaceCandidate, ModelEmbeddingResult, PerImageEmbedding,
    DEFAULT_EMBEDDING_DIM,
};
pub use validator::{EmbeddingValidator, QualityTier, SimilarityStats, ValidationReport};
