//! ONNX Runtime model backend.

use crate::config::ModelConfig;
use crate::metadata::ModelMetadata;
use crate::model::{ModelExecutor, ModelLoader};
use crate::preprocess::InputTensor;
use crate::results::softmax;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use ndarray::CowArray;
use once_cell::sync::OnceCell;
use ort::{
    GraphOptimizationLevel, SessionBuilder, environment::Environment, session::Session,
    tensor::OrtOwnedTensor, value::Value,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

static ORT_ENV: OnceCell<Arc<Environment>> = OnceCell::new();

fn environment() -> Result<Arc<Environment>> {
    ORT_ENV
        .get_or_try_init(|| {
            Ok::<_, anyhow::Error>(
                Environment::builder()
                    .with_name("vision-core")
                    .build()?
                    .into_arc(),
            )
        })
        .cloned()
}

/// Loads a local `.onnx` graph, either from configuration or from a
/// `file://` model URL in the metadata.
#[derive(Debug, Clone)]
pub struct OrtModelLoader {
    onnx_path: Option<PathBuf>,
    apply_softmax: bool,
}

impl OrtModelLoader {
    pub fn new(cfg: &ModelConfig) -> Self {
        Self {
            onnx_path: cfg.onnx_path.clone(),
            apply_softmax: cfg.apply_softmax,
        }
    }

    fn graph_path(&self, metadata: &ModelMetadata) -> Result<PathBuf> {
        if let Some(path) = &self.onnx_path {
            return Ok(path.clone());
        }
        match &metadata.model_url {
            Some(url) if url.scheme() == "file" => url
                .to_file_path()
                .map_err(|_| anyhow!("model url is not a local path: {url}")),
            Some(url) => anyhow::bail!("no local ONNX graph configured for {url}"),
            None => anyhow::bail!("metadata has no model_path and no onnx_path is configured"),
        }
    }
}

#[async_trait]
impl ModelLoader for OrtModelLoader {
    async fn load(&self, metadata: &ModelMetadata) -> Result<Arc<dyn ModelExecutor>> {
        let path = self.graph_path(metadata)?;
        if !path.exists() {
            anyhow::bail!("model file is missing: {}", path.display());
        }
        let env = environment()?;
        let session = SessionBuilder::new(&env)?
            .with_optimization_level(GraphOptimizationLevel::Level1)?
            .with_model_from_file(&path)
            .with_context(|| format!("cannot load ONNX graph {}", path.display()))?;
        tracing::info!("loaded ONNX graph {}", path.display());
        Ok(Arc::new(OrtExecutor {
            session: Mutex::new(session),
            apply_softmax: self.apply_softmax,
        }))
    }
}

pub struct OrtExecutor {
    session: Mutex<Session>,
    apply_softmax: bool,
}

#[async_trait]
impl ModelExecutor for OrtExecutor {
    async fn execute(&self, input: &InputTensor) -> Result<Vec<f32>> {
        let input_array = input.clone().into_dyn();
        let cow = CowArray::from(input_array.view());
        let session = self
            .session
            .lock()
            .map_err(|_| anyhow!("ONNX session lock poisoned"))?;
        let value = Value::from_array(session.allocator(), &cow)
            .map_err(|e| anyhow!("cannot build input tensor: {e}"))?;
        let outputs: Vec<Value> = session.run(vec![value])?;
        let first = outputs.first().ok_or_else(|| anyhow!("model produced no output"))?;
        let logits: OrtOwnedTensor<f32, _> = first.try_extract()?;
        let scores: Vec<f32> = logits.view().iter().cloned().collect();
        if scores.is_empty() {
            anyhow::bail!("model produced empty scores");
        }
        Ok(if self.apply_softmax {
            softmax(&scores)
        } else {
            scores
        })
    }
}
