//! Composite identity embedding from several per-image embeddings.

use crate::types::Embedding;
use crate::vector;
use thiserror::Error;

pub const COMPOSITE_SOURCE: &str = "composite";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregateError {
    #[error("got {weights} weights for {embeddings} embeddings")]
    WeightCountMismatch { embeddings: usize, weights: usize },
    #[error("embedding {index} has dimension {actual}, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },
}

/// Averages per-image embeddings into one L2-normalized identity vector.
#[derive(Debug, Clone, Default)]
pub struct CompositeAggregator;

impl CompositeAggregator {
    /// Mean of `embeddings`, weighted by `weights` (one per embedding,
    /// normalized to sum to 1) when given.
    ///
    /// `Ok(None)` for empty input or a directionless result. Mismatched
    /// weight counts or embedding dimensions are rejected before any math.
    pub fn aggregate(
        &self,
        embeddings: &[Embedding],
        weights: Option<&[f32]>,
    ) -> Result<Option<Embedding>, AggregateError> {
        if let Some(w) = weights {
            if w.len() != embeddings.len() {
                return Err(AggregateError::WeightCountMismatch {
                    embeddings: embeddings.len(),
                    weights: w.len(),
                });
            }
        }

        let Some(first) = embeddings.first() else {
            return Ok(None);
        };

        let expected = first.dim();
        if let Some((index, e)) = embeddings
            .iter()
            .enumerate()
            .find(|(_, e)| e.dim() != expected)
        {
            return Err(AggregateError::DimensionMismatch {
                index,
                expected,
                actual: e.dim(),
            });
        }

        let rows: Vec<&[f32]> = embeddings.iter().map(|e| e.values.as_slice()).collect();
        let weights: Option<Vec<f64>> = weights.map(|w| w.iter().map(|x| f64::from(*x)).collect());

        let mean = vector::weighted_mean(&rows, weights.as_deref());
        let Some(values) = vector::l2_normalize(&mean) else {
            tracing::warn!(count = embeddings.len(), "composite embedding has zero norm");
            return Ok(None);
        };

        Ok(Some(Embedding::new(values, COMPOSITE_SOURCE)))
    }
}
