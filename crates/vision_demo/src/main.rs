use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use vision_core::{HttpFetcher, ModelLoader, Orchestrator, VisionConfig};
#[cfg(not(feature = "ort"))]
use vision_core::ModelExecutor;

/// Load a vision model from its metadata document, list its test images
/// and optionally classify one of them.
#[derive(Debug, Parser, PartialEq)]
#[command(name = "vision-demo")]
#[command(version = env!("VISION_DEMO_VERSION"))]
struct Args {
    /// URL of the model metadata document
    metadata_url: Option<String>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Index of the test image to classify
    #[arg(long)]
    image: Option<usize>,
}

#[cfg(feature = "ort")]
fn model_loader(cfg: &VisionConfig) -> Box<dyn ModelLoader> {
    Box::new(vision_core::ort_backend::OrtModelLoader::new(&cfg.model))
}

#[cfg(not(feature = "ort"))]
fn model_loader(_cfg: &VisionConfig) -> Box<dyn ModelLoader> {
    Box::new(NoBackend)
}

/// Stand-in when built without a model backend: loading succeeds so the
/// metadata, labels and test images can still be inspected.
#[cfg(not(feature = "ort"))]
struct NoBackend;

#[cfg(not(feature = "ort"))]
#[async_trait::async_trait]
impl ModelLoader for NoBackend {
    async fn load(
        &self,
        _metadata: &vision_core::ModelMetadata,
    ) -> anyhow::Result<std::sync::Arc<dyn ModelExecutor>> {
        Ok(std::sync::Arc::new(NoBackend))
    }
}

#[cfg(not(feature = "ort"))]
#[async_trait::async_trait]
impl ModelExecutor for NoBackend {
    async fn execute(&self, _input: &vision_core::InputTensor) -> anyhow::Result<Vec<f32>> {
        anyhow::bail!("vision-demo was built without a model backend; rebuild with `--features ort`")
    }
}

async fn run(args: Args) -> Result<()> {
    let cfg = match &args.config {
        Some(path) => VisionConfig::load(path)?,
        None => VisionConfig::default(),
    };
    let fetcher = HttpFetcher::new(&cfg.http)?;
    let mut orchestrator = Orchestrator::new(fetcher, model_loader(&cfg), cfg.preprocess.clone());

    let session = orchestrator
        .load(args.metadata_url.as_deref())
        .await
        .context("failed to load model")?;
    let test_images = session.test_images().to_vec();
    println!(
        "{:?} model, {} labels, score threshold {:.2}",
        session.metadata().model_type,
        session.label_map().len(),
        session.metadata().score_threshold()
    );
    for (idx, entry) in test_images.iter().enumerate() {
        println!("[{idx}] {}  (thumb: {})", entry.image_url, entry.thumbnail_url);
    }

    if let Some(idx) = args.image {
        let entry = test_images
            .get(idx)
            .with_context(|| format!("no test image with index {idx}"))?;
        let results = orchestrator.classify_test_image(entry).await?;
        println!("{}", serde_json::to_string_pretty(&results)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    tracing::info!("vision-demo {}", env!("VISION_DEMO_VERSION"));

    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("vision-demo stopped with error: {e:#}");
        std::process::exit(1);
    }
}
