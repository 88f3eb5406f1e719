//! Where identity photos come from.

use crate::local::validate_key;
use async_trait::async_trait;
use image::imageops::FilterType;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Longest side, in pixels, images are downscaled to before detection.
pub const DEFAULT_MAX_IMAGE_SIDE: u32 = 1920;

const EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];
const MAX_FACE_IMAGES: usize = 5;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("identity not found: {0}")]
    NotFound(String),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("image decode failed: {0}")]
    Decode(String),
}

/// A named image belonging to one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Short display name, e.g. `profile.jpg` or `faces/face_2.png`.
    pub name: String,
    /// Source-specific locator (a file path for directories).
    pub locator: String,
}

#[async_trait]
pub trait ImageSource: Send + Sync {
    /// All identity keys this source knows about, sorted.
    async fn list_identities(&self) -> Result<Vec<String>, SourceError>;
    /// Images for one identity, in processing order.
    async fn list_images(&self, key: &str) -> Result<Vec<ImageRef>, SourceError>;
    async fn read_image(&self, image: &ImageRef) -> Result<Vec<u8>, SourceError>;
}

/// `<root>/<key>/profile.<ext>` then `<root>/<key>/faces/face_<1..=5>.<ext>`.
#[derive(Debug, Clone)]
pub struct DirectoryImageSource {
    root: PathBuf,
}

impl DirectoryImageSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// First `<stem>.<ext>` that exists under `dir`.
    async fn find_with_extension(dir: &Path, stem: &str) -> Option<PathBuf> {
        for ext in EXTENSIONS {
            let candidate = dir.join(format!("{stem}.{ext}"));
            if tokio::fs::metadata(&candidate)
                .await
                .is_ok_and(|m| m.is_file())
            {
                return Some(candidate);
            }
        }
        None
    }
}

#[async_trait]
impl ImageSource for DirectoryImageSource {
    async fn list_identities(&self) -> Result<Vec<String>, SourceError> {
        let io_err = |source| SourceError::Io {
            path: self.root.display().to_string(),
            source,
        };
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(io_err)?;
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                keys.push(name);
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn list_images(&self, key: &str) -> Result<Vec<ImageRef>, SourceError> {
        if let Err(e) = validate_key(key) {
            tracing::warn!(identity = key, error = %e, "refusing identity key");
            return Err(SourceError::NotFound(key.to_string()));
        }
        let dir = self.root.join(key);
        if !tokio::fs::metadata(&dir).await.is_ok_and(|m| m.is_dir()) {
            return Err(SourceError::NotFound(key.to_string()));
        }

        let mut images = Vec::new();
        if let Some(path) = Self::find_with_extension(&dir, "profile").await {
            images.push(image_ref(&dir, path));
        }
        let faces = dir.join("faces");
        for i in 1..=MAX_FACE_IMAGES {
            if let Some(path) = Self::find_with_extension(&faces, &format!("face_{i}")).await {
                images.push(image_ref(&dir, path));
            }
        }

        tracing::info!(
            identity = key,
            profile = images.first().is_some_and(|i| i.name.starts_with("profile")),
            images = images.len(),
            "collected identity images"
        );
        Ok(images)
    }

    async fn read_image(&self, image: &ImageRef) -> Result<Vec<u8>, SourceError> {
        tokio::fs::read(&image.locator)
            .await
            .map_err(|source| SourceError::Io {
                path: image.locator.clone(),
                source,
            })
    }
}

fn image_ref(identity_dir: &Path, path: PathBuf) -> ImageRef {
    let name = path
        .strip_prefix(identity_dir)
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_else(|_| path.display().to_string());
    ImageRef {
        name,
        locator: path.display().to_string(),
    }
}

/// Decode image bytes, downscaling so the longest side is at most `max_side`.
pub fn decode_image(bytes: &[u8], max_side: u32) -> Result<DynamicImage, SourceError> {
    let img = image::load_from_memory(bytes).map_err(|e| SourceError::Decode(e.to_string()))?;
    let (w, h) = (img.width(), img.height());
    if max_side == 0 || w.max(h) <= max_side {
        return Ok(img);
    }

    let scale = max_side as f64 / w.max(h) as f64;
    let nw = ((w as f64 * scale).round() as u32).max(1);
    let nh = ((h as f64 * scale).round() as u32).max(1);
    tracing::debug!(from = ?(w, h), to = ?(nw, nh), "downscaling image");
    Ok(img.resize_exact(nw, nh, FilterType::Triangle))
}
