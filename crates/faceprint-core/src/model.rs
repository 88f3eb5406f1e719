//! Embedding-model capability and registry entries.
//!
//! Model-specific behaviour is data (weight, dimension), not a type
//! hierarchy: every ensemble member is a [`ModelSpec`] plus something that
//! implements [`FaceAnalyzer`].

use crate::types::{FaceCandidate, DEFAULT_EMBEDDING_DIM};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ModelError {
    #[error("model unavailable: {0}")]
    Unavailable(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("invalid model output: {0}")]
    InvalidOutput(String),
}

/// Static description of one ensemble member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub id: String,
    /// Fixed fusion weight; re-normalized across models at fusion time.
    #[serde(default = "default_weight")]
    pub weight: f32,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default)]
    pub description: String,
}

fn default_weight() -> f32 {
    1.0
}

fn default_dimension() -> usize {
    DEFAULT_EMBEDDING_DIM
}

impl ModelSpec {
    pub fn new(id: impl Into<String>, weight: f32, dimension: usize) -> Self {
        Self {
            id: id.into(),
            weight,
            dimension,
            description: String::new(),
        }
    }
}

/// A face detector + embedder: given an image, zero or more candidates.
///
/// Implementations need not be reentrant; each instance is driven by a
/// single worker thread.
pub trait FaceAnalyzer: Send {
    fn analyze(&mut self, image: &DynamicImage) -> Result<Vec<FaceCandidate>, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_defaults() {
        let spec: ModelSpec = serde_json::from_str(r#"{"id": "buffalo_l"}"#).unwrap();
        assert_eq!(spec.weight, 1.0);
        assert_eq!(spec.dimension, 512);
        assert!(spec.description.is_empty());
    }
}
