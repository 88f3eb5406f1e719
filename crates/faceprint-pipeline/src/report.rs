//! Serializable records of what happened to each identity and image.

use crate::error::IdentityStatus;
use faceprint_core::{Embedding, PerImageEmbedding, ValidationReport};
use faceprint_io::{IdentityInfo, PersistReceipt};
use serde::Serialize;

/// Outcome of one model on one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Accepted,
    NoFace,
    TooSmall,
    LowQuality,
    InvalidEmbedding,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelAttempt {
    pub model: String,
    pub status: AttemptStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_area: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ModelAttempt {
    pub(crate) fn new(model: &str, status: AttemptStatus) -> Self {
        Self {
            model: model.to_string(),
            status,
            confidence: None,
            face_area: None,
            quality_score: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    /// At least one model result survived and was fused.
    Embedded,
    /// Processed, but every model result was discarded.
    NoEmbedding,
    /// Could not be read or decoded.
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageDiagnostics {
    pub image: String,
    pub status: ImageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: Vec<ModelAttempt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityDistribution {
    pub count: usize,
    pub min: f32,
    pub mean: f32,
    pub max: f32,
    /// Images at or above the good-quality threshold.
    pub good: usize,
}

impl QualityDistribution {
    pub fn from_scores(scores: &[f32], good_threshold: f32) -> Option<Self> {
        if scores.is_empty() {
            return None;
        }
        Some(Self {
            count: scores.len(),
            min: scores.iter().copied().fold(f32::INFINITY, f32::min),
            mean: scores.iter().sum::<f32>() / scores.len() as f32,
            max: scores.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            good: scores.iter().filter(|&&s| s >= good_threshold).count(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EmbeddingSummary {
    pub dimension: usize,
    pub norm: f32,
    pub images: usize,
    pub quality_weighted: bool,
}

/// Everything known about one identity after processing.
#[derive(Debug, Clone, Serialize)]
pub struct IdentityReport {
    pub key: String,
    pub status: IdentityStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityInfo>,
    pub images: Vec<ImageDiagnostics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityDistribution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<EmbeddingSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<PersistReceipt>,
    /// Per-image fused vectors, kept in memory only.
    #[serde(skip)]
    pub per_image: Vec<PerImageEmbedding>,
    /// The composite, also when validation rejected it.
    #[serde(skip)]
    pub composite: Option<Embedding>,
}

impl IdentityReport {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            status: IdentityStatus::Error,
            message: String::new(),
            identity: None,
            images: Vec::new(),
            validation: None,
            quality: None,
            embedding: None,
            receipt: None,
            per_image: Vec::new(),
            composite: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == IdentityStatus::Success
    }

    /// Saved, but only to the local fallback.
    pub fn is_degraded(&self) -> bool {
        self.receipt.as_ref().is_some_and(|r| r.degraded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_distribution() {
        let d = QualityDistribution::from_scores(&[0.2, 0.6, 0.7], 0.5).unwrap();
        assert_eq!(d.count, 3);
        assert!((d.min - 0.2).abs() < 1e-6);
        assert!((d.mean - 0.5).abs() < 1e-6);
        assert!((d.max - 0.7).abs() < 1e-6);
        assert_eq!(d.good, 2);
        assert!(QualityDistribution::from_scores(&[], 0.5).is_none());
    }

    #[test]
    fn test_report_serialization_skips_in_memory_fields() {
        let mut report = IdentityReport::new("SV1");
        report.status = IdentityStatus::Failed;
        report.composite = Some(Embedding::new(vec![1.0], "composite"));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "failed");
        assert!(json.get("composite").is_none());
        assert!(json.get("receipt").is_none());
        assert_eq!(json["images"], serde_json::json!([]));
    }

    #[test]
    fn test_attempt_status_snake_case() {
        let json = serde_json::to_value(ModelAttempt::new("m", AttemptStatus::TooSmall)).unwrap();
        assert_eq!(json["status"], "too_small");
        assert!(json.get("confidence").is_none());
    }
}
