use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use faceprint_core::FaceAnalyzer;
use faceprint_io::{
    BackendClient, DirectoryImageSource, HttpCacheInvalidator, ImageSource, LocalEmbeddingStore,
    LookupChain, PersistenceChain, RemoteAnalyzer,
};
use faceprint_pipeline::{
    process_all, Collaborators, IdentityPipeline, IdentityReport, ModelEntry, ModelRegistry,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "faceprint", about = "Build composite face embeddings from identity photo sets")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process one identity and persist its composite embedding
    Enroll {
        /// Identity key (the photo directory name)
        key: String,
        /// Also write the identity report as JSON to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Process every identity under the image root
    All {
        /// Report path (default: face_extraction_report_<timestamp>.json)
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Show the configured models and whether they can be reached
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Enroll { key, report } => {
            let (pipeline, invalidator) = build_pipeline(&config).await?;
            let result = pipeline.process(&key).await;
            invalidator.drain(config.http_timeout()).await;
            print_identity(&result);
            if let Some(path) = report {
                write_json(&path, &result)?;
                println!("Report written to {}", path.display());
            }
            if !result.is_success() {
                std::process::exit(1);
            }
        }
        Commands::All { report } => {
            let (pipeline, invalidator) = build_pipeline(&config).await?;
            let keys = pipeline
                .images()
                .list_identities()
                .await
                .with_context(|| format!("listing identities under {}", config.image_root.display()))?;
            println!("Found {} identities under {}", keys.len(), config.image_root.display());

            let batch = process_all(pipeline, keys, &config.batch_config()).await;
            invalidator.drain(config.http_timeout()).await;
            for identity in &batch.identities {
                print_identity(identity);
            }
            println!();
            println!(
                "Total: {}  success: {}  failed: {}  error: {}  (local only: {})",
                batch.total, batch.success, batch.failed, batch.error, batch.degraded
            );
            println!("Success rate: {:.1}%", batch.success_rate);
            for model in &batch.models {
                println!(
                    "  {:<16} {:>4}/{:<4} accepted ({:.1}%)",
                    model.model, model.accepted, model.attempts, model.success_rate
                );
            }

            let path = report.unwrap_or_else(default_report_path);
            write_json(&path, &batch)?;
            println!("Report written to {}", path.display());
        }
        Commands::Models => {
            let models = config.load_models()?;
            for m in &models {
                println!(
                    "{:<16} weight={:.2} dim={} workers={} {}",
                    m.spec.id,
                    m.spec.weight,
                    m.spec.dimension,
                    m.workers,
                    m.endpoint()
                );
                if !m.spec.description.is_empty() {
                    println!("{:<16} {}", "", m.spec.description);
                }
            }
            match load_registry(&config).await {
                Ok(registry) => println!("\n{} of {} models available", registry.len(), models.len()),
                Err(e) => println!("\nno models available: {e}"),
            }
        }
    }

    Ok(())
}

async fn load_registry(config: &Config) -> Result<ModelRegistry> {
    let timeout = config.http_timeout();
    let entries = config
        .load_models()?
        .into_iter()
        .map(|m| {
            let id = m.spec.id.clone();
            let endpoint = m.endpoint().to_string();
            ModelEntry {
                spec: m.spec,
                workers: m.workers,
                factory: Arc::new(move || {
                    RemoteAnalyzer::connect(id.clone(), endpoint.clone(), timeout)
                        .map(|a| Box::new(a) as Box<dyn FaceAnalyzer>)
                }),
            }
        })
        .collect();

    Ok(ModelRegistry::load(entries).await?)
}

/// The pipeline plus the invalidator whose in-flight requests must be
/// drained before exit.
async fn build_pipeline(config: &Config) -> Result<(Arc<IdentityPipeline>, Arc<HttpCacheInvalidator>)> {
    let registry = load_registry(config).await?;
    tracing::info!(models = ?registry.ids(), policy = %config.fusion_policy, "ensemble ready");

    let backend = Arc::new(BackendClient::new(config.backend_config())?);
    if backend.has_credentials() {
        if let Err(e) = backend.login().await {
            tracing::warn!(error = %e, "initial login failed; authenticated endpoints will retry");
        }
    }

    let invalidator = Arc::new(HttpCacheInvalidator::new(
        config.face_api_url.clone(),
        config.retry_policy(),
    )?);
    let collaborators = Collaborators {
        lookup: Some(Arc::new(LookupChain::standard(
            Some(backend.clone()),
            config.image_root.clone(),
        ))),
        images: Arc::new(DirectoryImageSource::new(config.image_root.clone())),
        sink: Arc::new(PersistenceChain::standard(
            Some(backend),
            LocalEmbeddingStore::new(config.embeddings_dir.clone()),
        )),
        notifier: Some(invalidator.clone()),
    };

    let pipeline = Arc::new(IdentityPipeline::new(
        config.pipeline_config(),
        registry,
        collaborators,
    ));
    Ok((pipeline, invalidator))
}

fn print_identity(report: &IdentityReport) {
    let tier = report
        .validation
        .as_ref()
        .map(|v| format!(" [{} {:.3}]", v.tier, v.validation_score))
        .unwrap_or_default();
    println!(
        "{:<12} {:<8}{} {}",
        report.key,
        report.status.as_str(),
        tier,
        report.message
    );
}

fn default_report_path() -> PathBuf {
    PathBuf::from(format!(
        "face_extraction_report_{}.json",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    ))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))
}
