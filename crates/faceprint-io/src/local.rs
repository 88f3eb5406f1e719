//! Last-resort on-disk embedding store.
//!
//! Each identity gets `<key>.f32` (raw little-endian floats) and a JSON
//! sidecar `<key>_metadata.json`. Writes go through a temp file and a
//! rename so readers never see a torn vector.

use faceprint_core::Embedding;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};

/// Contents of `<key>_metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSidecar {
    pub key: String,
    pub dimension: usize,
    pub norm: f32,
    /// Hex SHA-256 of the `.f32` file contents.
    pub sha256: String,
    /// RFC 3339 timestamp.
    pub saved_at: String,
    pub note: String,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct LocalEmbeddingStore {
    dir: PathBuf,
}

impl LocalEmbeddingStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn vector_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.f32"))
    }

    pub fn sidecar_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}_metadata.json"))
    }

    /// Write the vector and its sidecar; returns the vector path.
    pub async fn save(
        &self,
        key: &str,
        embedding: &Embedding,
        metadata: &Value,
    ) -> io::Result<PathBuf> {
        validate_key(key)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let bytes: Vec<u8> = embedding
            .values
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();

        let sidecar = EmbeddingSidecar {
            key: key.to_string(),
            dimension: embedding.dim(),
            norm: embedding.norm(),
            sha256: format!("{:x}", Sha256::digest(&bytes)),
            saved_at: chrono::Utc::now().to_rfc3339(),
            note: "stored locally; backend unavailable".into(),
            metadata: metadata.clone(),
        };
        let sidecar_json = serde_json::to_vec_pretty(&sidecar)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let vector_path = self.vector_path(key);
        write_atomic(&vector_path, &bytes).await?;
        write_atomic(&self.sidecar_path(key), &sidecar_json).await?;

        tracing::info!(
            identity = key,
            path = %vector_path.display(),
            dimension = sidecar.dimension,
            "embedding saved to local store"
        );
        Ok(vector_path)
    }

    /// Read back a stored vector, checking it against its sidecar.
    pub async fn load(&self, key: &str) -> io::Result<(Embedding, EmbeddingSidecar)> {
        validate_key(key)?;
        let bytes = tokio::fs::read(self.vector_path(key)).await?;
        let sidecar: EmbeddingSidecar =
            serde_json::from_slice(&tokio::fs::read(self.sidecar_path(key)).await?)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        if bytes.len() % 4 != 0 || bytes.len() / 4 != sidecar.dimension {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "vector file holds {} bytes, sidecar says {} floats",
                    bytes.len(),
                    sidecar.dimension
                ),
            ));
        }
        if format!("{:x}", Sha256::digest(&bytes)) != sidecar.sha256 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "vector checksum mismatch",
            ));
        }

        let values = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok((Embedding::new(values, "composite"), sidecar))
    }
}

/// Keys become file and directory names; refuse anything that could escape
/// the directory they are joined onto.
pub(crate) fn validate_key(key: &str) -> io::Result<()> {
    if key.is_empty()
        || key.contains('/')
        || key.contains('\\')
        || key.contains("..")
        || key.contains('\0')
    {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unsafe identity key: {key:?}"),
        ));
    }
    Ok(())
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalEmbeddingStore::new(dir.path().join("embeddings"));
        let e = Embedding::new(vec![0.6, 0.8, 0.0], "composite");

        let path = store
            .save("SV001", &e, &serde_json::json!({"images": 3}))
            .await
            .unwrap();
        assert_eq!(path, store.vector_path("SV001"));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 12);

        let (loaded, sidecar) = store.load("SV001").await.unwrap();
        assert_eq!(loaded.values, e.values);
        assert_eq!(sidecar.key, "SV001");
        assert_eq!(sidecar.dimension, 3);
        assert!((sidecar.norm - 1.0).abs() < 1e-6);
        assert_eq!(sidecar.sha256.len(), 64);
        assert_eq!(sidecar.metadata["images"], 3);
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalEmbeddingStore::new(dir.path());
        store
            .save("A1", &Embedding::new(vec![1.0], "composite"), &Value::Null)
            .await
            .unwrap();
        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["A1.f32", "A1_metadata.json"]);
    }

    #[tokio::test]
    async fn test_rejects_path_traversal_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalEmbeddingStore::new(dir.path());
        let e = Embedding::new(vec![1.0], "composite");
        for key in ["", "../evil", "a/b", "a\\b"] {
            let err = store.save(key, &e, &Value::Null).await.unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput, "key {key:?}");
        }
    }

    #[tokio::test]
    async fn test_load_detects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalEmbeddingStore::new(dir.path());
        store
            .save("K", &Embedding::new(vec![1.0, 2.0], "composite"), &Value::Null)
            .await
            .unwrap();
        std::fs::write(store.vector_path("K"), 9.0f32.to_le_bytes().repeat(2)).unwrap();
        let err = store.load("K").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
