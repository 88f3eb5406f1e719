//! Per-identity orchestration: images → per-model results → per-image
//! ensemble embeddings → validation → composite → persistence.

use crate::engine::ModelRegistry;
use crate::error::{IdentityError, IdentityStatus};
use crate::report::{
    AttemptStatus, EmbeddingSummary, IdentityReport, ImageDiagnostics, ImageStatus, ModelAttempt,
    QualityDistribution,
};
use faceprint_core::quality::DEFAULT_GOOD_QUALITY_THRESHOLD;
use faceprint_core::{
    CompositeAggregator, Embedding, EmbeddingValidator, EnsembleFuser, FaceCandidateSelector,
    FusionPolicy, ImageQualityScorer, ModelEmbeddingResult, PerImageEmbedding, Selection,
    DEFAULT_EMBEDDING_DIM,
};
use faceprint_io::{
    decode_image, CacheNotifier, EmbeddingSink, IdentityLookup, ImageRef, ImageSource,
    PersistRequest, DEFAULT_MAX_IMAGE_SIDE,
};
use image::DynamicImage;
use std::sync::Arc;

/// Detections below this quality are dropped. Deliberately lenient.
pub const DEFAULT_QUALITY_FLOOR: f32 = 0.15;
/// Minimum face side in pixels; the area threshold is its square.
pub const DEFAULT_MIN_FACE_SIZE: u32 = 40;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub fusion_policy: FusionPolicy,
    pub embedding_dim: usize,
    pub min_face_size: u32,
    pub quality_floor: f32,
    pub good_quality_threshold: f32,
    pub max_image_side: u32,
    /// Weight each image by its quality when building the composite.
    pub weight_by_quality: bool,
    /// Persist the composite even when validation rejects it.
    pub persist_rejected: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fusion_policy: FusionPolicy::default(),
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            min_face_size: DEFAULT_MIN_FACE_SIZE,
            quality_floor: DEFAULT_QUALITY_FLOOR,
            good_quality_threshold: DEFAULT_GOOD_QUALITY_THRESHOLD,
            max_image_side: DEFAULT_MAX_IMAGE_SIDE,
            weight_by_quality: true,
            persist_rejected: false,
        }
    }
}

/// External systems the pipeline talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub lookup: Option<Arc<dyn IdentityLookup>>,
    pub images: Arc<dyn ImageSource>,
    pub sink: Arc<dyn EmbeddingSink>,
    pub notifier: Option<Arc<dyn CacheNotifier>>,
}

pub struct IdentityPipeline {
    config: PipelineConfig,
    models: ModelRegistry,
    selector: FaceCandidateSelector,
    scorer: ImageQualityScorer,
    fuser: EnsembleFuser,
    aggregator: CompositeAggregator,
    validator: EmbeddingValidator,
    collaborators: Collaborators,
}

impl IdentityPipeline {
    pub fn new(config: PipelineConfig, models: ModelRegistry, collaborators: Collaborators) -> Self {
        for model in models.iter() {
            let spec = model.spec();
            if spec.dimension != config.embedding_dim {
                tracing::warn!(
                    model = %spec.id,
                    declared = spec.dimension,
                    expected = config.embedding_dim,
                    "model dimension does not match the ensemble; its results will be discarded"
                );
            }
        }

        Self {
            selector: FaceCandidateSelector::new(config.min_face_size),
            scorer: ImageQualityScorer::new(config.good_quality_threshold),
            fuser: EnsembleFuser::new(config.fusion_policy, config.embedding_dim),
            aggregator: CompositeAggregator,
            validator: EmbeddingValidator,
            config,
            models,
            collaborators,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    pub fn images(&self) -> &Arc<dyn ImageSource> {
        &self.collaborators.images
    }

    /// Process one identity. Never fails: every outcome lands in the report.
    pub async fn process(&self, key: &str) -> IdentityReport {
        let mut report = IdentityReport::new(key);
        tracing::info!(identity = key, "processing identity");

        match self.run(key, &mut report).await {
            Ok(()) => {
                report.status = IdentityStatus::Success;
                report.message = match &report.receipt {
                    Some(r) if r.degraded => format!("embedding stored locally at {}", r.location),
                    Some(r) => format!("embedding saved via {}", r.strategy),
                    None => "embedding created".into(),
                };
                tracing::info!(identity = key, message = %report.message, "identity succeeded");
            }
            Err(e) => {
                report.status = e.status();
                report.message = e.to_string();
                match report.status {
                    IdentityStatus::Error => {
                        tracing::error!(identity = key, error = %e, "identity processing error")
                    }
                    _ => tracing::warn!(identity = key, reason = %e, "identity failed"),
                }
            }
        }
        report
    }

    async fn run(&self, key: &str, report: &mut IdentityReport) -> Result<(), IdentityError> {
        if let Some(lookup) = &self.collaborators.lookup {
            let info = lookup
                .lookup(key)
                .await
                .map_err(|e| IdentityError::NotFound(e.to_string()))?;
            report.identity = Some(info);
        }

        let images = self.collaborators.images.list_images(key).await?;
        if images.is_empty() {
            return Err(IdentityError::NoImages(key.to_string()));
        }

        for image in &images {
            let (diagnostics, embedded) = self.process_image(key, image).await;
            report.images.push(diagnostics);
            if let Some(e) = embedded {
                report.per_image.push(e);
            }
        }

        if report.per_image.is_empty() {
            return Err(IdentityError::ExtractionFailure(format!(
                "none of {} images produced a usable face",
                images.len()
            )));
        }

        let embeddings: Vec<Embedding> = report.per_image.iter().map(|p| p.embedding.clone()).collect();
        let qualities: Vec<f32> = report.per_image.iter().map(|p| p.quality_score).collect();

        let validation = self.validator.validate(&embeddings);
        report.validation = Some(validation.clone());
        report.quality = QualityDistribution::from_scores(&qualities, self.config.good_quality_threshold);

        let weights = self.config.weight_by_quality.then_some(qualities.as_slice());
        let composite = self.aggregator.aggregate(&embeddings, weights)?;
        if let Some(composite) = &composite {
            report.embedding = Some(EmbeddingSummary {
                dimension: composite.dim(),
                norm: composite.norm(),
                images: embeddings.len(),
                quality_weighted: self.config.weight_by_quality,
            });
            report.composite = Some(composite.clone());
        }

        if !validation.is_valid {
            if let (true, Some(composite)) = (self.config.persist_rejected, &composite) {
                match self.persist(key, composite, report).await {
                    Ok(receipt) => report.receipt = Some(receipt),
                    Err(e) => tracing::warn!(identity = key, error = %e, "could not persist rejected composite"),
                }
            }
            return Err(IdentityError::ValidationRejected {
                recommendation: validation.recommendation,
                score: validation.validation_score,
            });
        }

        let composite = composite
            .ok_or_else(|| IdentityError::ExtractionFailure("composite embedding has no direction".into()))?;

        let receipt = self.persist(key, &composite, report).await?;
        report.receipt = Some(receipt);

        if let Some(notifier) = &self.collaborators.notifier {
            notifier.notify(key);
        }
        Ok(())
    }

    async fn persist(
        &self,
        key: &str,
        composite: &Embedding,
        report: &IdentityReport,
    ) -> Result<faceprint_io::PersistReceipt, IdentityError> {
        let metadata = serde_json::json!({
            "identity": report.identity,
            "fusion_policy": self.config.fusion_policy,
            "models": self.models.ids(),
            "images_total": report.images.len(),
            "images_embedded": report.per_image.len(),
            "validation": report.validation,
            "quality": report.quality,
            "images": report.images,
            "created_at": chrono::Utc::now().to_rfc3339(),
        });
        let request = PersistRequest {
            key: key.to_string(),
            embedding: composite.clone(),
            metadata,
        };
        Ok(self.collaborators.sink.persist(&request).await?)
    }

    /// Run every model over one image. Failures stay inside the diagnostics.
    async fn process_image(
        &self,
        key: &str,
        image_ref: &ImageRef,
    ) -> (ImageDiagnostics, Option<PerImageEmbedding>) {
        let mut diagnostics = ImageDiagnostics {
            image: image_ref.name.clone(),
            status: ImageStatus::NoEmbedding,
            quality_score: None,
            error: None,
            attempts: Vec::new(),
        };

        let image = match self.load_image(image_ref).await {
            Ok(image) => Arc::new(image),
            Err(e) => {
                tracing::warn!(identity = key, image = %image_ref.name, error = %e, "skipping unreadable image");
                diagnostics.status = ImageStatus::Error;
                diagnostics.error = Some(e);
                return (diagnostics, None);
            }
        };

        let mut results = Vec::new();
        for model in self.models.iter() {
            let spec = model.spec();
            let candidates = match model.detect(image.clone()).await {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(identity = key, image = %image_ref.name, model = %spec.id, error = %e, "detection failed");
                    let mut attempt = ModelAttempt::new(&spec.id, AttemptStatus::Error);
                    attempt.error = Some(e.to_string());
                    diagnostics.attempts.push(attempt);
                    continue;
                }
            };

            let (attempt, result) = self.evaluate(&image, spec, &candidates);
            tracing::debug!(
                identity = key,
                image = %image_ref.name,
                model = %spec.id,
                status = ?attempt.status,
                confidence = attempt.confidence,
                quality = attempt.quality_score,
                "model attempt"
            );
            diagnostics.attempts.push(attempt);
            results.extend(result);
        }

        let Some(embedding) = self.fuser.fuse(&results) else {
            tracing::info!(identity = key, image = %image_ref.name, "no usable face in image");
            return (diagnostics, None);
        };

        let quality = results.iter().map(|r| r.quality_score).sum::<f32>() / results.len() as f32;
        diagnostics.status = ImageStatus::Embedded;
        diagnostics.quality_score = Some(quality);

        let per_image = PerImageEmbedding {
            image: image_ref.name.clone(),
            embedding,
            quality_score: quality,
            models: results.into_iter().map(|r| r.model_id).collect(),
        };
        (diagnostics, Some(per_image))
    }

    /// Select, check and score one model's detections for one image.
    fn evaluate(
        &self,
        image: &DynamicImage,
        spec: &faceprint_core::ModelSpec,
        candidates: &[faceprint_core::FaceCandidate],
    ) -> (ModelAttempt, Option<ModelEmbeddingResult>) {
        let face = match self.selector.pick(candidates) {
            Selection::NoFace => return (ModelAttempt::new(&spec.id, AttemptStatus::NoFace), None),
            Selection::TooSmall { area } => {
                let mut attempt = ModelAttempt::new(&spec.id, AttemptStatus::TooSmall);
                attempt.face_area = Some(area);
                return (attempt, None);
            }
            Selection::Selected(face) => face,
        };

        let mut attempt = ModelAttempt::new(&spec.id, AttemptStatus::Accepted);
        attempt.confidence = Some(face.confidence);
        attempt.face_area = Some(face.area);

        if spec.dimension != self.config.embedding_dim {
            attempt.status = AttemptStatus::InvalidEmbedding;
            attempt.error = Some(format!(
                "model declares {}-d embeddings, ensemble fuses {}-d",
                spec.dimension, self.config.embedding_dim
            ));
            return (attempt, None);
        }

        let embedding = &face.embedding;
        if embedding.dim() != spec.dimension
            || embedding.values.iter().any(|v| !v.is_finite())
            || embedding.norm() <= f32::EPSILON
        {
            attempt.status = AttemptStatus::InvalidEmbedding;
            attempt.error = Some(format!(
                "expected {} finite non-zero values, got {}",
                spec.dimension,
                embedding.dim()
            ));
            return (attempt, None);
        }

        let metrics = self.scorer.score_region(image, &face.bbox);
        attempt.quality_score = Some(metrics.quality_score);
        if metrics.quality_score < self.config.quality_floor {
            attempt.status = AttemptStatus::LowQuality;
            return (attempt, None);
        }

        let result = ModelEmbeddingResult {
            model_id: spec.id.clone(),
            embedding: embedding.clone(),
            model_weight: spec.weight,
            detection_confidence: face.confidence,
            quality_score: metrics.quality_score,
            face_area: face.area,
        };
        (attempt, Some(result))
    }

    async fn load_image(&self, image_ref: &ImageRef) -> Result<DynamicImage, String> {
        let bytes = self
            .collaborators
            .images
            .read_image(image_ref)
            .await
            .map_err(|e| e.to_string())?;
        let max_side = self.config.max_image_side;
        tokio::task::spawn_blocking(move || decode_image(&bytes, max_side))
            .await
            .map_err(|e| format!("decode task failed: {e}"))?
            .map_err(|e| e.to_string())
    }
}
