//! Running many identities in small concurrent batches.

use crate::error::{IdentityError, IdentityStatus};
use crate::pipeline::IdentityPipeline;
use crate::report::{AttemptStatus, IdentityReport};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Identities processed concurrently.
    pub batch_size: usize,
    /// Pause between batches.
    pub pause: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 3,
            pause: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelStats {
    pub model: String,
    pub attempts: usize,
    pub accepted: usize,
    /// Percent of attempts that produced a usable embedding.
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub error: usize,
    /// Successes that only reached the local fallback store.
    pub degraded: usize,
    /// Percent of identities that succeeded.
    pub success_rate: f64,
    pub models: Vec<ModelStats>,
    pub identities: Vec<IdentityReport>,
}

impl BatchReport {
    fn build(run_id: Uuid, started_at: DateTime<Utc>, identities: Vec<IdentityReport>) -> Self {
        let count = |status| identities.iter().filter(|r| r.status == status).count();
        let total = identities.len();
        let success = count(IdentityStatus::Success);
        let success_rate = if total == 0 {
            0.0
        } else {
            success as f64 / total as f64 * 100.0
        };

        Self {
            run_id,
            started_at,
            finished_at: Utc::now(),
            total,
            success,
            failed: count(IdentityStatus::Failed),
            error: count(IdentityStatus::Error),
            degraded: identities.iter().filter(|r| r.is_degraded()).count(),
            success_rate,
            models: model_stats(&identities),
            identities,
        }
    }
}

fn model_stats(identities: &[IdentityReport]) -> Vec<ModelStats> {
    let mut tally: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for attempt in identities
        .iter()
        .flat_map(|r| &r.images)
        .flat_map(|i| &i.attempts)
    {
        let entry = tally.entry(attempt.model.as_str()).or_default();
        entry.0 += 1;
        if attempt.status == AttemptStatus::Accepted {
            entry.1 += 1;
        }
    }

    tally
        .into_iter()
        .map(|(model, (attempts, accepted))| ModelStats {
            model: model.to_string(),
            attempts,
            accepted,
            success_rate: if attempts == 0 {
                0.0
            } else {
                accepted as f64 / attempts as f64 * 100.0
            },
        })
        .collect()
}

/// Process every key. Always returns a report covering all of them; a
/// panicking identity is recorded as `error` and the batch carries on.
pub async fn process_all(
    pipeline: Arc<IdentityPipeline>,
    keys: Vec<String>,
    config: &BatchConfig,
) -> BatchReport {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let batch_size = config.batch_size.max(1);
    let batches = keys.len().div_ceil(batch_size);

    tracing::info!(%run_id, identities = keys.len(), batch_size, batches, "starting batch run");

    let mut reports = Vec::with_capacity(keys.len());
    for (n, chunk) in keys.chunks(batch_size).enumerate() {
        tracing::info!(batch = n + 1, of = batches, size = chunk.len(), "processing batch");

        let handles: Vec<_> = chunk
            .iter()
            .map(|key| {
                let pipeline = pipeline.clone();
                let key = key.clone();
                (key.clone(), tokio::spawn(async move { pipeline.process(&key).await }))
            })
            .collect();

        for (key, handle) in handles {
            let report = match handle.await {
                Ok(report) => report,
                Err(e) => {
                    let err = IdentityError::Aborted(e.to_string());
                    tracing::error!(identity = %key, error = %err, "identity task did not complete");
                    let mut report = IdentityReport::new(&key);
                    report.status = err.status();
                    report.message = err.to_string();
                    report
                }
            };
            reports.push(report);
        }

        if n + 1 < batches && !config.pause.is_zero() {
            tokio::time::sleep(config.pause).await;
        }
    }

    let report = BatchReport::build(run_id, started_at, reports);
    tracing::info!(
        %run_id,
        total = report.total,
        success = report.success,
        failed = report.failed,
        error = report.error,
        success_rate = report.success_rate,
        "batch run finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineConfig;
    use crate::testutil::*;

    fn fast() -> BatchConfig {
        BatchConfig {
            batch_size: 2,
            pause: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_batch_covers_every_identity() {
        let h = Harness::new(PipelineConfig {
            embedding_dim: DIM,
            ..PipelineConfig::default()
        })
        .await;
        h.add_identity("A", 1);
        h.add_identity("B", 0);
        h.script(vec![vec![face(around_axis(1), 0.9)]]);

        let keys = vec!["A".to_string(), "B".to_string(), "MISSING".to_string()];
        let report = process_all(h.pipeline.clone(), keys, &fast()).await;

        assert_eq!(report.total, 3);
        assert_eq!(report.success, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(report.error, 0);
        assert!((report.success_rate - 100.0 / 3.0).abs() < 1e-9);
        let order: Vec<&str> = report.identities.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(order, vec!["A", "B", "MISSING"]);
        assert!(report.finished_at >= report.started_at);
    }

    #[tokio::test]
    async fn test_panicking_identity_does_not_abort_batch() {
        let h = Harness::new(PipelineConfig {
            embedding_dim: DIM,
            ..PipelineConfig::default()
        })
        .await;
        h.add_identity("PANIC1", 1);
        h.add_identity("OK1", 1);
        // Batch size 1 keeps the scripted detections in key order.
        h.script(vec![vec![face(around_axis(1), 0.9)], vec![face(around_axis(2), 0.9)]]);

        let config = BatchConfig {
            batch_size: 1,
            pause: Duration::ZERO,
        };
        let keys = vec!["PANIC1".to_string(), "OK1".to_string()];
        let report = process_all(h.pipeline.clone(), keys, &config).await;

        assert_eq!(report.identities[0].status, IdentityStatus::Error);
        assert!(report.identities[0].message.contains("aborted"));
        assert_eq!(report.identities[1].status, IdentityStatus::Success);
        assert_eq!(report.error, 1);
        assert_eq!(report.success, 1);
    }

    #[tokio::test]
    async fn test_model_stats() {
        let h = Harness::new(PipelineConfig {
            embedding_dim: DIM,
            ..PipelineConfig::default()
        })
        .await;
        h.add_identity("A", 2);
        h.script(vec![vec![face(around_axis(1), 0.9)], vec![small_face(around_axis(2))]]);

        let report = process_all(h.pipeline.clone(), vec!["A".to_string()], &fast()).await;
        assert_eq!(
            report.models,
            vec![ModelStats {
                model: "scripted".into(),
                attempts: 2,
                accepted: 1,
                success_rate: 50.0,
            }]
        );
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let h = Harness::new(PipelineConfig::default()).await;
        let report = process_all(h.pipeline.clone(), Vec::new(), &fast()).await;
        assert_eq!(report.total, 0);
        assert_eq!(report.success_rate, 0.0);
        assert!(report.models.is_empty());
    }

    #[test]
    fn test_report_json_shape() {
        let report = BatchReport::build(Uuid::nil(), Utc::now(), Vec::new());
        let json = serde_json::to_value(&report).unwrap();
        for field in ["run_id", "started_at", "finished_at", "success_rate", "models", "identities"] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
    }
}
