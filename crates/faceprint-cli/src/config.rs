use anyhow::{Context, Result};
use faceprint_core::{FusionPolicy, ModelSpec};
use faceprint_io::{BackendConfig, Credentials, RetryPolicy};
use faceprint_pipeline::{BatchConfig, PipelineConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// CLI configuration, loaded from `FACEPRINT_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the per-identity photo directories.
    pub image_root: PathBuf,
    /// Where embeddings land when the backend is unreachable.
    pub embeddings_dir: PathBuf,
    pub backend_url: String,
    /// Recognition service hosting the models and the feature cache.
    pub face_api_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// TOML file with `[[model]]` entries; one default model when unset.
    pub models_file: Option<PathBuf>,
    pub fusion_policy: FusionPolicy,
    pub min_face_size: u32,
    pub quality_floor: f32,
    pub good_quality: f32,
    pub max_image_size: u32,
    pub embedding_dim: usize,
    pub weight_by_quality: bool,
    pub persist_rejected: bool,
    pub batch_size: usize,
    pub batch_pause_ms: u64,
    pub http_timeout_secs: u64,
    pub http_retries: u32,
    pub retry_backoff_ms: u64,
    pub session_ttl_secs: u64,
}

impl Config {
    /// Load configuration from `FACEPRINT_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let string = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let fusion_policy = match var("FACEPRINT_FUSION_POLICY") {
            Some(v) => v.parse().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "invalid FACEPRINT_FUSION_POLICY; using default");
                FusionPolicy::default()
            }),
            None => FusionPolicy::default(),
        };

        Self {
            image_root: PathBuf::from(string("FACEPRINT_IMAGE_ROOT", "uploads/students")),
            embeddings_dir: PathBuf::from(string("FACEPRINT_EMBEDDINGS_DIR", "data/embeddings")),
            backend_url: string("FACEPRINT_BACKEND_URL", "http://localhost:8080/api"),
            face_api_url: string("FACEPRINT_FACE_API_URL", "http://localhost:8001"),
            username: var("FACEPRINT_USERNAME").filter(|v| !v.is_empty()),
            password: var("FACEPRINT_PASSWORD").filter(|v| !v.is_empty()),
            models_file: var("FACEPRINT_MODELS_FILE").map(PathBuf::from),
            fusion_policy,
            min_face_size: env_parse(&var, "FACEPRINT_MIN_FACE_SIZE", 40),
            quality_floor: env_parse(&var, "FACEPRINT_QUALITY_FLOOR", 0.15),
            good_quality: env_parse(&var, "FACEPRINT_GOOD_QUALITY", 0.5),
            max_image_size: env_parse(&var, "FACEPRINT_MAX_IMAGE_SIZE", 1920),
            embedding_dim: env_parse(&var, "FACEPRINT_EMBEDDING_DIM", 512),
            weight_by_quality: env_flag(&var, "FACEPRINT_WEIGHT_BY_QUALITY", true),
            persist_rejected: env_flag(&var, "FACEPRINT_PERSIST_REJECTED", false),
            batch_size: env_parse(&var, "FACEPRINT_BATCH_SIZE", 3),
            batch_pause_ms: env_parse(&var, "FACEPRINT_BATCH_PAUSE_MS", 500),
            http_timeout_secs: env_parse(&var, "FACEPRINT_HTTP_TIMEOUT_SECS", 10),
            http_retries: env_parse(&var, "FACEPRINT_HTTP_RETRIES", 3),
            retry_backoff_ms: env_parse(&var, "FACEPRINT_RETRY_BACKOFF_MS", 500),
            session_ttl_secs: env_parse(&var, "FACEPRINT_SESSION_TTL_SECS", 1800),
        }
    }

    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.http_retries,
            backoff: Duration::from_millis(self.retry_backoff_ms),
            timeout: self.http_timeout(),
        }
    }

    pub fn backend_config(&self) -> BackendConfig {
        let mut backend = BackendConfig::new(self.backend_url.clone());
        backend.credentials = self.credentials();
        backend.retry = self.retry_policy();
        backend.session_ttl = Duration::from_secs(self.session_ttl_secs);
        backend
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            fusion_policy: self.fusion_policy,
            embedding_dim: self.embedding_dim,
            min_face_size: self.min_face_size,
            quality_floor: self.quality_floor,
            good_quality_threshold: self.good_quality,
            max_image_side: self.max_image_size,
            weight_by_quality: self.weight_by_quality,
            persist_rejected: self.persist_rejected,
        }
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            batch_size: self.batch_size,
            pause: Duration::from_millis(self.batch_pause_ms),
        }
    }

    /// The model table: from `models_file` if set, otherwise one default model.
    ///
    /// Entries without a `dimension` inherit `embedding_dim`; an explicit
    /// dimension that disagrees with it is rejected.
    pub fn load_models(&self) -> Result<Vec<ModelConfig>> {
        let entries = match &self.models_file {
            Some(path) => read_models_file(path)?,
            None => vec![ModelEntryToml {
                id: "buffalo_l".into(),
                weight: 1.0,
                dimension: None,
                description: "InsightFace buffalo_l (ArcFace R100)".into(),
                endpoint: None,
                workers: 1,
            }],
        };

        entries
            .into_iter()
            .map(|entry| {
                let dimension = entry.dimension.unwrap_or(self.embedding_dim);
                if dimension != self.embedding_dim {
                    anyhow::bail!(
                        "model {} declares {}-d embeddings but FACEPRINT_EMBEDDING_DIM is {}",
                        entry.id,
                        dimension,
                        self.embedding_dim
                    );
                }
                let endpoint = entry.endpoint.unwrap_or_else(|| {
                    format!(
                        "{}/api/v1/analyze/{}",
                        self.face_api_url.trim_end_matches('/'),
                        entry.id
                    )
                });
                Ok(ModelConfig {
                    spec: ModelSpec {
                        id: entry.id,
                        weight: entry.weight,
                        dimension,
                        description: entry.description,
                    },
                    endpoint,
                    workers: entry.workers,
                })
            })
            .collect()
    }
}

/// One configured ensemble member.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub spec: ModelSpec,
    pub endpoint: String,
    pub workers: usize,
}

impl ModelConfig {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// One `[[model]]` entry as written.
#[derive(Debug, Deserialize)]
struct ModelEntryToml {
    id: String,
    #[serde(default = "default_weight")]
    weight: f32,
    dimension: Option<usize>,
    #[serde(default)]
    description: String,
    /// Analyze endpoint; derived from the face API URL when omitted.
    endpoint: Option<String>,
    #[serde(default = "default_workers")]
    workers: usize,
}

fn default_weight() -> f32 {
    1.0
}

fn default_workers() -> usize {
    1
}

#[derive(Deserialize)]
struct ModelsFile {
    #[serde(default, rename = "model")]
    models: Vec<ModelEntryToml>,
}

fn read_models_file(path: &Path) -> Result<Vec<ModelEntryToml>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading model table {}", path.display()))?;
    parse_models(&text).with_context(|| format!("parsing model table {}", path.display()))
}

fn parse_models(text: &str) -> Result<Vec<ModelEntryToml>> {
    let file: ModelsFile = toml::from_str(text)?;
    if file.models.is_empty() {
        anyhow::bail!("no [[model]] entries");
    }
    Ok(file.models)
}

fn env_parse<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_flag(var: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    var(key)
        .map(|v| !matches!(v.trim(), "0" | "false" | "no" | "off"))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(move |k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[]);
        assert_eq!(c.image_root, PathBuf::from("uploads/students"));
        assert_eq!(c.fusion_policy, FusionPolicy::QualityWeighted);
        assert_eq!(c.min_face_size, 40);
        assert!((c.quality_floor - 0.15).abs() < 1e-6);
        assert_eq!(c.embedding_dim, 512);
        assert!(c.weight_by_quality);
        assert!(!c.persist_rejected);
        assert!(c.credentials().is_none());

        let retry = c.retry_policy();
        assert_eq!(retry, RetryPolicy::default());
        assert_eq!(c.batch_config(), BatchConfig::default());
    }

    #[test]
    fn test_overrides_and_bad_values() {
        let c = config(&[
            ("FACEPRINT_FUSION_POLICY", "mean"),
            ("FACEPRINT_BATCH_SIZE", "8"),
            ("FACEPRINT_MIN_FACE_SIZE", "not-a-number"),
            ("FACEPRINT_WEIGHT_BY_QUALITY", "0"),
            ("FACEPRINT_USERNAME", "admin"),
            ("FACEPRINT_PASSWORD", "secret"),
        ]);
        assert_eq!(c.fusion_policy, FusionPolicy::Mean);
        assert_eq!(c.batch_size, 8);
        assert_eq!(c.min_face_size, 40);
        assert!(!c.weight_by_quality);
        assert_eq!(c.credentials().unwrap().username, "admin");
        assert!(c.backend_config().credentials.is_some());
    }

    #[test]
    fn test_username_without_password_is_anonymous() {
        let c = config(&[("FACEPRINT_USERNAME", "admin")]);
        assert!(c.credentials().is_none());
    }

    #[test]
    fn test_default_model_table() {
        let c = config(&[("FACEPRINT_FACE_API_URL", "http://faces:8001/")]);
        let models = c.load_models().unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].spec.id, "buffalo_l");
        assert_eq!(models[0].endpoint(), "http://faces:8001/api/v1/analyze/buffalo_l");
    }

    #[test]
    fn test_parse_models_toml() {
        let models = parse_models(
            r#"
            [[model]]
            id = "buffalo_l"
            weight = 0.6
            description = "ArcFace R100"

            [[model]]
            id = "antelopev2"
            weight = 0.4
            dimension = 512
            endpoint = "http://gpu-box:9000/analyze"
            workers = 2
            "#,
        )
        .unwrap();
        assert_eq!(models.len(), 2);
        assert!(models[0].dimension.is_none());
        assert_eq!(models[0].workers, 1);
        assert!(models[0].endpoint.is_none());
        assert_eq!(models[1].workers, 2);
        assert_eq!(models[1].endpoint.as_deref(), Some("http://gpu-box:9000/analyze"));
    }

    #[test]
    fn test_models_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.toml");
        std::fs::write(&path, "[[model]]\nid = \"m\"\n").unwrap();
        let c = Config {
            models_file: Some(path),
            ..config(&[])
        };
        let models = c.load_models().unwrap();
        assert_eq!(models[0].endpoint(), "http://localhost:8001/api/v1/analyze/m");
        assert_eq!(models[0].spec.weight, 1.0);
    }

    #[test]
    fn test_model_dimension_follows_embedding_dim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.toml");
        std::fs::write(&path, "[[model]]\nid = \"small\"\n").unwrap();
        let c = Config {
            models_file: Some(path.clone()),
            ..config(&[("FACEPRINT_EMBEDDING_DIM", "128")])
        };
        assert_eq!(c.load_models().unwrap()[0].spec.dimension, 128);
        assert_eq!(config(&[("FACEPRINT_EMBEDDING_DIM", "128")]).load_models().unwrap()[0].spec.dimension, 128);

        std::fs::write(&path, "[[model]]\nid = \"big\"\ndimension = 512\n").unwrap();
        let err = c.load_models().unwrap_err();
        assert!(err.to_string().contains("declares 512-d"), "{err}");
    }

    #[test]
    fn test_empty_model_table_rejected() {
        assert!(parse_models("").is_err());
    }
}
