//! Ensemble fusion: one embedding per image from several models' outputs.

use crate::types::{Embedding, ModelEmbeddingResult, DEFAULT_EMBEDDING_DIM};
use crate::vector;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const ENSEMBLE_SOURCE: &str = "ensemble";

/// How model outputs for the same face are weighted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionPolicy {
    /// Unweighted average.
    Mean,
    /// Each model's fixed configured weight.
    WeightedAverage,
    /// `model_weight × detection_confidence × quality_score`.
    #[default]
    QualityWeighted,
}

impl FusionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FusionPolicy::Mean => "mean",
            FusionPolicy::WeightedAverage => "weighted_average",
            FusionPolicy::QualityWeighted => "quality_weighted",
        }
    }

    fn weight(&self, result: &ModelEmbeddingResult) -> f64 {
        match self {
            FusionPolicy::Mean => 1.0,
            FusionPolicy::WeightedAverage => f64::from(result.model_weight),
            FusionPolicy::QualityWeighted => {
                f64::from(result.model_weight)
                    * f64::from(result.detection_confidence)
                    * f64::from(result.quality_score)
            }
        }
    }
}

impl fmt::Display for FusionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FusionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(FusionPolicy::Mean),
            "weighted_average" | "weighted" => Ok(FusionPolicy::WeightedAverage),
            "quality_weighted" | "quality" => Ok(FusionPolicy::QualityWeighted),
            other => Err(format!("unknown fusion policy: {other}")),
        }
    }
}

/// Fuses per-model embeddings of one face into a single unit vector.
#[derive(Debug, Clone)]
pub struct EnsembleFuser {
    policy: FusionPolicy,
    dimension: usize,
}

impl Default for EnsembleFuser {
    fn default() -> Self {
        Self::new(FusionPolicy::default(), DEFAULT_EMBEDDING_DIM)
    }
}

impl EnsembleFuser {
    pub fn new(policy: FusionPolicy, dimension: usize) -> Self {
        Self { policy, dimension }
    }

    pub fn policy(&self) -> FusionPolicy {
        self.policy
    }

    /// Fuse `results` under the configured policy.
    ///
    /// Results whose embedding length differs from the configured dimension
    /// are discarded first. Returns `None` when nothing usable remains. A
    /// fused vector with (near) zero norm cannot be normalized, so it is
    /// also `None` rather than a zero embedding; callers treat the face as
    /// absent.
    pub fn fuse(&self, results: &[ModelEmbeddingResult]) -> Option<Embedding> {
        let usable: Vec<&ModelEmbeddingResult> = results
            .iter()
            .filter(|r| {
                let ok = r.embedding.dim() == self.dimension;
                if !ok {
                    tracing::warn!(
                        model = %r.model_id,
                        expected = self.dimension,
                        actual = r.embedding.dim(),
                        "discarding embedding with wrong dimension"
                    );
                }
                ok
            })
            .collect();

        if usable.is_empty() {
            return None;
        }

        let rows: Vec<&[f32]> = usable.iter().map(|r| r.embedding.values.as_slice()).collect();
        let weights: Vec<f64> = usable.iter().map(|r| self.policy.weight(r)).collect();

        let mean = vector::weighted_mean(&rows, Some(&weights));
        let values = vector::l2_normalize(&mean)?;

        tracing::debug!(
            policy = %self.policy,
            models = usable.len(),
            "fused ensemble embedding"
        );

        Some(Embedding::new(values, ENSEMBLE_SOURCE))
    }
}
