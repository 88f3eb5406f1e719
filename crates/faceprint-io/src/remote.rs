//! Face analyzer backed by an HTTP inference service.
//!
//! Uses the blocking reqwest client: instances live on model worker threads,
//! outside any async runtime.

use faceprint_core::{BoundingBox, Embedding, FaceAnalyzer, FaceCandidate, ModelError};
use image::{DynamicImage, ImageFormat};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::Deserialize;
use std::io::Cursor;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    #[serde(default)]
    faces: Vec<RemoteFace>,
}

#[derive(Debug, Deserialize)]
struct RemoteFace {
    bbox: [f32; 4],
    #[serde(alias = "confidence")]
    det_score: f32,
    #[serde(alias = "normed_embedding")]
    embedding: Vec<f32>,
}

pub struct RemoteAnalyzer {
    model_id: String,
    endpoint: String,
    http: Client,
}

impl RemoteAnalyzer {
    /// Build a client and probe the endpoint.
    ///
    /// A `405 Method Not Allowed` on the probe counts as reachable, since
    /// analyze endpoints typically only accept POST.
    pub fn connect(
        model_id: impl Into<String>,
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        let model_id = model_id.into();
        let endpoint = endpoint.into();
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ModelError::Unavailable(format!("{model_id}: {e}")))?;

        let probe = http
            .get(&endpoint)
            .send()
            .map_err(|e| ModelError::Unavailable(format!("{model_id} at {endpoint}: {e}")))?;
        let status = probe.status();
        if !(status.is_success() || status == StatusCode::METHOD_NOT_ALLOWED) {
            return Err(ModelError::Unavailable(format!(
                "{model_id} at {endpoint}: probe returned HTTP {status}"
            )));
        }

        tracing::info!(model = %model_id, endpoint = %endpoint, "remote model reachable");
        Ok(Self {
            model_id,
            endpoint,
            http,
        })
    }
}

impl FaceAnalyzer for RemoteAnalyzer {
    fn analyze(&mut self, image: &DynamicImage) -> Result<Vec<FaceCandidate>, ModelError> {
        let mut png = Cursor::new(Vec::new());
        image
            .write_to(&mut png, ImageFormat::Png)
            .map_err(|e| ModelError::InferenceFailed(format!("PNG encode: {e}")))?;

        let response = self
            .http
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "image/png")
            .body(png.into_inner())
            .send()
            .map_err(|e| ModelError::InferenceFailed(format!("{}: {e}", self.model_id)))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| ModelError::InferenceFailed(format!("{}: {e}", self.model_id)))?;
        if !status.is_success() {
            return Err(ModelError::InferenceFailed(format!(
                "{}: HTTP {status}: {body}",
                self.model_id
            )));
        }

        parse_faces(&self.model_id, &body)
    }
}

/// Parse an analyze response body into candidates tagged with `model_id`.
pub fn parse_faces(model_id: &str, body: &str) -> Result<Vec<FaceCandidate>, ModelError> {
    let response: AnalyzeResponse =
        serde_json::from_str(body).map_err(|e| ModelError::InvalidOutput(e.to_string()))?;

    Ok(response
        .faces
        .into_iter()
        .map(|f| {
            let [x1, y1, x2, y2] = f.bbox;
            FaceCandidate::new(
                BoundingBox::new(x1, y1, x2, y2),
                f.det_score,
                Embedding::new(f.embedding, model_id),
            )
        })
        .collect())
}
