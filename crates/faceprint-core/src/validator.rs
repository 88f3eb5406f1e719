//! Pairwise-similarity validation of an identity's per-image embeddings.
//!
//! All unordered pairs are compared by cosine similarity. Their spread
//! (consistency) and level (identity confidence) combine into a validation
//! score that decides the quality tier and acceptance.

use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use std::fmt;

// --- Fixed policy breakpoints ---
const CONSISTENCY_STD_SCALE: f64 = 0.3;
const IDENTITY_SIMILARITY_FLOOR: f64 = 0.3;
const IDENTITY_SIMILARITY_SPAN: f64 = 0.5;
const IDENTITY_WEIGHT: f64 = 0.7;
const CONSISTENCY_WEIGHT: f64 = 0.3;
const ACCEPT_SCORE: f64 = 0.3;
const SINGLE_EMBEDDING_SCORE: f64 = 0.5;

/// Categorical quality bucket for an identity's embedding set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Excellent,
    Good,
    Acceptable,
    Poor,
}

impl QualityTier {
    /// `(tier, min validation score, min mean similarity)`, best first.
    const THRESHOLDS: [(QualityTier, f64, f64); 3] = [
        (QualityTier::Excellent, 0.8, 0.7),
        (QualityTier::Good, 0.6, 0.6),
        (QualityTier::Acceptable, 0.4, 0.4),
    ];

    /// First tier whose both thresholds are strictly exceeded.
    pub fn classify(validation_score: f64, mean_similarity: f64) -> Self {
        Self::THRESHOLDS
            .iter()
            .find(|(_, score, mean)| validation_score > *score && mean_similarity > *mean)
            .map_or(QualityTier::Poor, |(tier, _, _)| *tier)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Excellent => "excellent",
            QualityTier::Good => "good",
            QualityTier::Acceptable => "acceptable",
            QualityTier::Poor => "poor",
        }
    }

    pub fn recommendation(&self) -> &'static str {
        match self {
            QualityTier::Excellent => "excellent quality",
            QualityTier::Good => "good quality",
            QualityTier::Acceptable => "acceptable quality; consider adding or retaking photos",
            QualityTier::Poor => "poor quality; retake all photos",
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Distribution of pairwise cosine similarities.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityStats {
    pub pairs: usize,
    pub mean: f64,
    pub median: f64,
    /// Population standard deviation.
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub q25: f64,
    pub q75: f64,
}

impl SimilarityStats {
    /// `None` for an empty sample.
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let n = sorted.len() as f64;
        let mean = sorted.iter().sum::<f64>() / n;
        let std = (sorted.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n).sqrt();

        Some(Self {
            pairs: sorted.len(),
            mean,
            median: percentile(&sorted, 50.0),
            std,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            q25: percentile(&sorted, 25.0),
            q75: percentile(&sorted, 75.0),
        })
    }
}

/// Outcome of validating one identity's embeddings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub num_embeddings: usize,
    /// Absent when fewer than two embeddings were compared.
    pub stats: Option<SimilarityStats>,
    pub consistency: Option<f64>,
    pub identity_confidence: Option<f64>,
    pub validation_score: f64,
    pub tier: QualityTier,
    pub is_valid: bool,
    pub recommendation: String,
}

impl ValidationReport {
    /// Policy for a lone embedding: a single clear photo is accepted.
    fn single_embedding() -> Self {
        Self {
            num_embeddings: 1,
            stats: None,
            consistency: None,
            identity_confidence: None,
            validation_score: SINGLE_EMBEDDING_SCORE,
            tier: QualityTier::Acceptable,
            is_valid: true,
            recommendation: "single image; add at least one more to assess consistency".into(),
        }
    }

    fn empty() -> Self {
        Self {
            num_embeddings: 0,
            stats: None,
            consistency: None,
            identity_confidence: None,
            validation_score: 0.0,
            tier: QualityTier::Poor,
            is_valid: false,
            recommendation: "no embeddings to validate".into(),
        }
    }

    pub fn mean_similarity(&self) -> Option<f64> {
        self.stats.map(|s| s.mean)
    }
}

/// Classifies an embedding set into a [`QualityTier`] with accept/reject.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingValidator;

impl EmbeddingValidator {
    pub fn validate(&self, embeddings: &[Embedding]) -> ValidationReport {
        match embeddings.len() {
            0 => return ValidationReport::empty(),
            1 => return ValidationReport::single_embedding(),
            _ => {}
        }

        let mut similarities = Vec::with_capacity(embeddings.len() * (embeddings.len() - 1) / 2);
        for (i, a) in embeddings.iter().enumerate() {
            for b in &embeddings[i + 1..] {
                similarities.push(f64::from(a.similarity(b)));
            }
        }

        let Some(stats) = SimilarityStats::from_samples(&similarities) else {
            return ValidationReport::empty();
        };

        let consistency = (1.0 - stats.std / CONSISTENCY_STD_SCALE).clamp(0.0, 1.0);
        let identity_confidence =
            ((stats.mean - IDENTITY_SIMILARITY_FLOOR) / IDENTITY_SIMILARITY_SPAN).clamp(0.0, 1.0);
        let validation_score = IDENTITY_WEIGHT * identity_confidence + CONSISTENCY_WEIGHT * consistency;
        let tier = QualityTier::classify(validation_score, stats.mean);
        let is_valid = validation_score > ACCEPT_SCORE;

        tracing::info!(
            embeddings = embeddings.len(),
            mean_similarity = stats.mean,
            std_similarity = stats.std,
            validation_score,
            %tier,
            is_valid,
            "validated embedding set"
        );

        ValidationReport {
            num_embeddings: embeddings.len(),
            stats: Some(stats),
            consistency: Some(consistency),
            identity_confidence: Some(identity_confidence),
            validation_score,
            tier,
            is_valid,
            recommendation: tier.recommendation().to_string(),
        }
    }
}

/// Linear-interpolated percentile of an ascending, non-empty slice.
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: Vec<f32>) -> Embedding {
        Embedding::new(values, "test")
    }

    /// Unit vector at `cos_to_x` similarity with the x axis, rotated in the xy plane.
    fn at_cos(cos_to_x: f32, sign: f32) -> Embedding {
        let sin = (1.0 - cos_to_x * cos_to_x).sqrt();
        emb(vec![cos_to_x, sign * sin, 0.0])
    }

    #[test]
    fn test_single_embedding_fallback() {
        let report = EmbeddingValidator.validate(&[emb(vec![1.0, 0.0])]);
        assert_eq!(report.tier, QualityTier::Acceptable);
        assert!(report.is_valid);
        assert_eq!(report.validation_score, 0.5);
        assert!(report.stats.is_none());
    }

    #[test]
    fn test_identical_pair_is_excellent() {
        let e = emb(vec![0.6, 0.8, 0.0]);
        let report = EmbeddingValidator.validate(&[e.clone(), e]);
        let stats = report.stats.unwrap();
        assert!((stats.mean - 1.0).abs() < 1e-6);
        assert!(stats.std.abs() < 1e-6);
        assert!(report.validation_score >= 0.8);
        assert_eq!(report.tier, QualityTier::Excellent);
        assert!(report.is_valid);
    }

    #[test]
    fn test_orthogonal_pair_is_poor_and_rejected() {
        let report = EmbeddingValidator.validate(&[emb(vec![1.0, 0.0]), emb(vec![0.0, 1.0])]);
        assert!(report.mean_similarity().unwrap().abs() < 1e-6);
        assert_eq!(report.tier, QualityTier::Poor);
        assert!(!report.is_valid);
    }

    #[test]
    fn test_stats_over_all_pairs() {
        // x, at 0.8 above, at 0.8 below: pairs 0.8, 0.8, and 0.28
        let embs = vec![emb(vec![1.0, 0.0, 0.0]), at_cos(0.8, 1.0), at_cos(0.8, -1.0)];
        let report = EmbeddingValidator.validate(&embs);
        let stats = report.stats.unwrap();
        assert_eq!(stats.pairs, 3);
        assert!((stats.max - 0.8).abs() < 1e-5);
        assert!((stats.min - 0.28).abs() < 1e-5);
        assert!((stats.median - 0.8).abs() < 1e-5);
        assert!((stats.mean - (0.8 + 0.8 + 0.28) / 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_score_formula() {
        let embs = vec![emb(vec![1.0, 0.0, 0.0]), at_cos(0.8, 1.0), at_cos(0.8, -1.0)];
        let report = EmbeddingValidator.validate(&embs);
        let stats = report.stats.unwrap();
        let consistency = (1.0 - stats.std / 0.3).clamp(0.0, 1.0);
        let confidence = ((stats.mean - 0.3) / 0.5).clamp(0.0, 1.0);
        assert!((report.validation_score - (0.7 * confidence + 0.3 * consistency)).abs() < 1e-12);
    }

    #[test]
    fn test_high_similarity_set_is_excellent() {
        let embs = vec![at_cos(0.95, 1.0), at_cos(0.95, -1.0), emb(vec![1.0, 0.0, 0.0])];
        let report = EmbeddingValidator.validate(&embs);
        assert_eq!(report.tier, QualityTier::Excellent);
        assert!(report.is_valid);
    }

    #[test]
    fn test_classify_breakpoints() {
        assert_eq!(QualityTier::classify(0.81, 0.71), QualityTier::Excellent);
        assert_eq!(QualityTier::classify(0.81, 0.65), QualityTier::Good);
        assert_eq!(QualityTier::classify(0.8, 0.9), QualityTier::Good);
        assert_eq!(QualityTier::classify(0.61, 0.5), QualityTier::Acceptable);
        assert_eq!(QualityTier::classify(0.41, 0.41), QualityTier::Acceptable);
        assert_eq!(QualityTier::classify(0.4, 0.9), QualityTier::Poor);
        assert_eq!(QualityTier::classify(0.9, 0.4), QualityTier::Poor);
    }

    #[test]
    fn test_empty_is_rejected() {
        let report = EmbeddingValidator.validate(&[]);
        assert_eq!(report.tier, QualityTier::Poor);
        assert!(!report.is_valid);
    }

    #[test]
    fn test_percentile_interpolates() {
        let sorted = [0.0, 1.0, 2.0, 3.0];
        assert!((percentile(&sorted, 25.0) - 0.75).abs() < 1e-12);
        assert!((percentile(&sorted, 50.0) - 1.5).abs() < 1e-12);
        assert_eq!(percentile(&sorted, 100.0), 3.0);
    }
}
