use serde::{Deserialize, Serialize};

/// Embedding length produced by the ArcFace-family models we ensemble.
pub const DEFAULT_EMBEDDING_DIM: usize = 512;

/// Bounding box for a detected face in corner form (pixel coordinates).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    /// `(x2 - x1) * (y2 - y1)`; inverted boxes have zero area.
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }
}

/// Face embedding vector (512-dimensional for the default ensemble).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// What produced this vector: a model id, `"ensemble"` or `"composite"`.
    pub source: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>, source: impl Into<String>) -> Self {
        Self {
            values,
            source: Some(source.into()),
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean (L2) norm.
    pub fn norm(&self) -> f32 {
        self.values
            .iter()
            .map(|v| f64::from(*v) * f64::from(*v))
            .sum::<f64>()
            .sqrt() as f32
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar. Zero vectors
    /// compare as 0.0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f64;
        let mut norm_a = 0.0f64;
        let mut norm_b = 0.0f64;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            let (a, b) = (f64::from(*a), f64::from(*b));
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            (dot / denom) as f32
        } else {
            0.0
        }
    }
}

/// One detected face in one image, as reported by one model.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceCandidate {
    pub bbox: BoundingBox,
    /// Detection confidence in [0, 1].
    pub confidence: f32,
    pub embedding: Embedding,
    pub area: f32,
}

impl FaceCandidate {
    pub fn new(bbox: BoundingBox, confidence: f32, embedding: Embedding) -> Self {
        Self {
            area: bbox.area(),
            bbox,
            confidence,
            embedding,
        }
    }

    /// Ranking key used to pick the dominant face in an image.
    pub fn selection_score(&self) -> f32 {
        self.confidence * self.area
    }
}

/// A model's surviving embedding for one image, the unit fed to ensemble fusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEmbeddingResult {
    pub model_id: String,
    pub embedding: Embedding,
    pub model_weight: f32,
    pub detection_confidence: f32,
    pub quality_score: f32,
    pub face_area: f32,
}

/// The fused embedding representing the face in one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerImageEmbedding {
    pub image: String,
    pub embedding: Embedding,
    pub quality_score: f32,
    /// Models whose results went into the fusion, in registry order.
    pub models: Vec<String>,
}
