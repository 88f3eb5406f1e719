use faceprint_core::AggregateError;
use faceprint_io::{PersistError, SourceError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why an identity did not end in success.
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("identity not found: {0}")]
    NotFound(String),
    #[error("no images found for identity {0}")]
    NoImages(String),
    #[error("no embeddings extracted: {0}")]
    ExtractionFailure(String),
    #[error("{recommendation} (validation score {score:.3})")]
    ValidationRejected { recommendation: String, score: f64 },
    #[error(transparent)]
    Persistence(#[from] PersistError),
    #[error("aggregation failed: {0}")]
    Aggregate(#[from] AggregateError),
    #[error("image source error: {0}")]
    Source(SourceError),
    #[error("identity task aborted: {0}")]
    Aborted(String),
}

impl IdentityError {
    /// `failed` for data problems with the identity itself, `error` for
    /// faults in the system processing it.
    pub fn status(&self) -> IdentityStatus {
        match self {
            IdentityError::NotFound(_)
            | IdentityError::NoImages(_)
            | IdentityError::ExtractionFailure(_)
            | IdentityError::ValidationRejected { .. } => IdentityStatus::Failed,
            IdentityError::Persistence(_)
            | IdentityError::Aggregate(_)
            | IdentityError::Source(_)
            | IdentityError::Aborted(_) => IdentityStatus::Error,
        }
    }
}

impl From<SourceError> for IdentityError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::NotFound(key) => IdentityError::NotFound(key),
            other => IdentityError::Source(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityStatus {
    Success,
    Failed,
    Error,
}

impl IdentityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityStatus::Success => "success",
            IdentityStatus::Failed => "failed",
            IdentityStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for IdentityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faceprint_io::ChainError;

    #[test]
    fn test_status_mapping() {
        assert_eq!(IdentityError::NoImages("a".into()).status(), IdentityStatus::Failed);
        assert_eq!(
            IdentityError::ValidationRejected {
                recommendation: "retake".into(),
                score: 0.1
            }
            .status(),
            IdentityStatus::Failed
        );
        let persist = PersistError {
            key: "a".into(),
            source: ChainError { failures: vec![] },
        };
        assert_eq!(IdentityError::from(persist).status(), IdentityStatus::Error);
        assert_eq!(IdentityError::Aborted("panic".into()).status(), IdentityStatus::Error);
    }

    #[test]
    fn test_source_not_found_maps_to_not_found() {
        let err = IdentityError::from(SourceError::NotFound("SV9".into()));
        assert!(matches!(err, IdentityError::NotFound(ref k) if k == "SV9"));
        assert_eq!(err.status(), IdentityStatus::Failed);
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            IdentityError::NoImages("SV1".into()).to_string(),
            "no images found for identity SV1"
        );
        assert_eq!(
            IdentityStatus::Failed.to_string(),
            serde_json::to_value(IdentityStatus::Failed).unwrap()
        );
    }
}
