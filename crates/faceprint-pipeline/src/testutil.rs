//! Scripted collaborators for pipeline and batch tests.

use crate::engine::{ModelEntry, ModelRegistry};
use crate::pipeline::{Collaborators, IdentityPipeline, PipelineConfig};
use async_trait::async_trait;
use faceprint_core::{BoundingBox, Embedding, FaceAnalyzer, FaceCandidate, ModelError, ModelSpec};
use faceprint_io::{
    CacheNotifier, ChainError, EmbeddingSink, ImageRef, ImageSource, PersistError, PersistReceipt,
    PersistRequest, SourceError,
};
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use std::collections::{BTreeMap, VecDeque};
use std::io::Cursor;
use std::sync::{Arc, Mutex};

pub const DIM: usize = 4;

type Script = Arc<Mutex<VecDeque<Vec<FaceCandidate>>>>;

/// Returns pre-scripted detections, one entry per call.
struct ScriptedAnalyzer {
    script: Script,
}

impl FaceAnalyzer for ScriptedAnalyzer {
    fn analyze(&mut self, _image: &DynamicImage) -> Result<Vec<FaceCandidate>, ModelError> {
        Ok(self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }
}

/// 96×96 vertical stripes: sharp, well exposed, mid-grey on average.
pub fn striped_png() -> Vec<u8> {
    let img = GrayImage::from_fn(96, 96, |x, _| if (x / 4) % 2 == 0 { Luma([75]) } else { Luma([175]) });
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

/// 96×96 of a single grey level.
pub fn flat_png(level: u8) -> Vec<u8> {
    let img = GrayImage::from_pixel(96, 96, Luma([level]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

/// Unit vector `(3·e0 + e_axis) / √10`; any two distinct axes are at cosine 0.9.
pub fn around_axis(axis: usize) -> Vec<f32> {
    let mut v = vec![0.0; DIM];
    v[0] = 3.0;
    v[axis] = 1.0;
    let n = 10f32.sqrt();
    v.iter().map(|x| x / n).collect()
}

pub fn face_in(values: Vec<f32>, confidence: f32, x1: f32, y1: f32, x2: f32, y2: f32) -> FaceCandidate {
    FaceCandidate::new(
        BoundingBox::new(x1, y1, x2, y2),
        confidence,
        Embedding::new(values, "scripted"),
    )
}

/// An 80×80 face centred in the striped test image.
pub fn face(values: Vec<f32>, confidence: f32) -> FaceCandidate {
    face_in(values, confidence, 8.0, 8.0, 88.0, 88.0)
}

/// 20×20: below the default 40 px minimum.
pub fn small_face(values: Vec<f32>) -> FaceCandidate {
    face_in(values, 0.99, 10.0, 10.0, 30.0, 30.0)
}

#[derive(Default)]
pub struct MemoryImages {
    identities: Mutex<BTreeMap<String, Vec<(String, Vec<u8>)>>>,
}

#[async_trait]
impl ImageSource for MemoryImages {
    async fn list_identities(&self) -> Result<Vec<String>, SourceError> {
        Ok(self.identities.lock().unwrap().keys().cloned().collect())
    }

    async fn list_images(&self, key: &str) -> Result<Vec<ImageRef>, SourceError> {
        let identities = self.identities.lock().unwrap();
        let images = identities
            .get(key)
            .ok_or_else(|| SourceError::NotFound(key.to_string()))?;
        Ok(images
            .iter()
            .map(|(name, _)| ImageRef {
                name: name.clone(),
                locator: format!("{key}/{name}"),
            })
            .collect())
    }

    async fn read_image(&self, image: &ImageRef) -> Result<Vec<u8>, SourceError> {
        let identities = self.identities.lock().unwrap();
        for (key, images) in identities.iter() {
            for (name, bytes) in images {
                if format!("{key}/{name}") == image.locator {
                    return Ok(bytes.clone());
                }
            }
        }
        Err(SourceError::NotFound(image.locator.clone()))
    }
}

pub struct RecordingSink {
    saved: Mutex<Vec<PersistRequest>>,
    fail: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            saved: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            saved: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn saved(&self) -> Vec<PersistRequest> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmbeddingSink for RecordingSink {
    async fn persist(&self, request: &PersistRequest) -> Result<PersistReceipt, PersistError> {
        if self.fail {
            return Err(PersistError {
                key: request.key.clone(),
                source: ChainError { failures: vec![] },
            });
        }
        if request.key.starts_with("PANIC") {
            panic!("sink exploded for {}", request.key);
        }
        self.saved.lock().unwrap().push(request.clone());
        Ok(PersistReceipt {
            strategy: "memory".into(),
            location: format!("mem://{}", request.key),
            degraded: false,
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    keys: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }
}

impl CacheNotifier for RecordingNotifier {
    fn notify(&self, key: &str) {
        self.keys.lock().unwrap().push(key.to_string());
    }
}

/// One scripted model plus in-memory collaborators.
pub struct Harness {
    pub pipeline: Arc<IdentityPipeline>,
    pub images: Arc<MemoryImages>,
    pub sink: Arc<RecordingSink>,
    pub notifier: Arc<RecordingNotifier>,
    script: Script,
}

impl Harness {
    pub async fn new(config: PipelineConfig) -> Self {
        Self::with_sink(config, RecordingSink::new()).await
    }

    pub async fn with_sink(config: PipelineConfig, sink: RecordingSink) -> Self {
        let spec = ModelSpec::new("scripted", 1.0, config.embedding_dim);
        Self::build(config, spec, sink).await
    }

    pub async fn with_model(config: PipelineConfig, spec: ModelSpec) -> Self {
        Self::build(config, spec, RecordingSink::new()).await
    }

    async fn build(config: PipelineConfig, spec: ModelSpec, sink: RecordingSink) -> Self {
        let script: Script = Arc::new(Mutex::new(VecDeque::new()));
        let factory_script = script.clone();
        let registry = ModelRegistry::load(vec![ModelEntry {
            spec,
            workers: 1,
            factory: Arc::new(move || {
                Ok(Box::new(ScriptedAnalyzer {
                    script: factory_script.clone(),
                }) as Box<dyn FaceAnalyzer>)
            }),
        }])
        .await
        .unwrap();

        let images = Arc::new(MemoryImages::default());
        let sink = Arc::new(sink);
        let notifier = Arc::new(RecordingNotifier::default());
        let collaborators = Collaborators {
            lookup: None,
            images: images.clone(),
            sink: sink.clone(),
            notifier: Some(notifier.clone()),
        };

        Self {
            pipeline: Arc::new(IdentityPipeline::new(config, registry, collaborators)),
            images,
            sink,
            notifier,
            script,
        }
    }

    /// Register `count` striped images for `key` (zero creates an empty identity).
    pub fn add_identity(&self, key: &str, count: usize) {
        let png = striped_png();
        let images = (1..=count)
            .map(|i| (format!("faces/face_{i}.png"), png.clone()))
            .collect();
        self.images
            .identities
            .lock()
            .unwrap()
            .insert(key.to_string(), images);
    }

    pub fn add_raw_image(&self, key: &str, name: &str, bytes: Vec<u8>) {
        self.images
            .identities
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push((name.to_string(), bytes));
    }

    /// Queue detections, one entry per (image, model) call in order.
    pub fn script(&self, detections: Vec<Vec<FaceCandidate>>) {
        self.script.lock().unwrap().extend(detections);
    }
}
