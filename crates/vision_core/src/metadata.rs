//! Model metadata document: model family, output heads and the
//! auxiliary resources (label map, test images, model graph).

use crate::error::{Result, VisionError};
use crate::fetch::{Fetcher, resolve_relative};
use reqwest::Url;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    Classifier,
    Detector,
    Segmenter,
}

impl ModelType {
    /// Top-level metadata key identifying each model family, in lookup order.
    const KEYS: [(&'static str, ModelType); 3] = [
        ("tfjs_classifier_model_metadata", ModelType::Classifier),
        ("tfjs_detector_model_metadata", ModelType::Detector),
        ("tfjs_segmenter_model_metadata", ModelType::Segmenter),
    ];
}

/// Per-head output configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputHeadSpec {
    #[serde(default)]
    pub score_threshold: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labelmap_path: Option<String>,
}

/// Declared model input tensor.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InputTensorSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub shape: Vec<i64>,
}

impl InputTensorSpec {
    /// Spatial `(height, width)` for `[1, H, W, 3]` or `[1, 3, H, W]` shapes.
    pub fn spatial_size(&self) -> Option<(u32, u32)> {
        let dim = |v: i64| u32::try_from(v).ok().filter(|d| *d > 0);
        match self.shape.as_slice() {
            [_, 3, h, w] => Some((dim(*h)?, dim(*w)?)),
            [_, h, w, 3] => Some((dim(*h)?, dim(*w)?)),
            _ => None,
        }
    }
}

/// Validated metadata, with every auxiliary path resolved against the
/// metadata document's own URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelMetadata {
    pub model_type: ModelType,
    pub labelmap_url: Option<Url>,
    pub test_images_index_url: Option<Url>,
    pub model_url: Option<Url>,
    pub input_tensors: Vec<InputTensorSpec>,
    pub output_heads: Vec<OutputHeadSpec>,
}

impl ModelMetadata {
    /// Threshold of the first output head; decode guarantees one exists.
    pub fn score_threshold(&self) -> f32 {
        self.output_heads
            .first()
            .map(|h| h.score_threshold)
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct TaskMetadata {
    #[serde(default)]
    input_tensor_metadata: Vec<InputTensorSpec>,
    output_head_metadata: Vec<OutputHeadSpec>,
}

#[derive(Debug, Deserialize)]
struct MetadataDocument {
    #[serde(default)]
    test_images_index_path: Option<String>,
    #[serde(default)]
    model_path: Option<String>,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

/// Decodes a metadata document previously fetched from `url`.
pub fn parse_metadata(url: &Url, bytes: &[u8]) -> Result<ModelMetadata> {
    let parse_err = |reason: String| VisionError::MetadataParse {
        url: url.to_string(),
        reason,
    };

    let mut doc: MetadataDocument =
        serde_json::from_slice(bytes).map_err(|e| parse_err(e.to_string()))?;

    let (key, model_type) = ModelType::KEYS
        .into_iter()
        .find(|(key, _)| doc.rest.contains_key(*key))
        .ok_or_else(|| parse_err("no recognized model type key".to_string()))?;
    let task_value = doc.rest.remove(key).unwrap_or_default();
    let task: TaskMetadata =
        serde_json::from_value(task_value).map_err(|e| parse_err(format!("{key}: {e}")))?;

    if task.output_head_metadata.is_empty() {
        return Err(parse_err(format!("{key}: output_head_metadata is empty")));
    }
    if let Some(head) = task
        .output_head_metadata
        .iter()
        .find(|h| !(0.0..=1.0).contains(&h.score_threshold))
    {
        return Err(parse_err(format!(
            "score_threshold {} outside [0, 1]",
            head.score_threshold
        )));
    }

    let resolve = |path: Option<&str>| -> Result<Option<Url>> {
        path.filter(|p| !p.trim().is_empty())
            .map(|p| resolve_relative(url, p))
            .transpose()
    };
    let labelmap_url = resolve(
        task.output_head_metadata
            .first()
            .and_then(|h| h.labelmap_path.as_deref()),
    )?;
    let test_images_index_url = resolve(doc.test_images_index_path.as_deref())?;
    let model_url = resolve(doc.model_path.as_deref())?;

    tracing::debug!(?model_type, %url, "decoded model metadata");
    Ok(ModelMetadata {
        model_type,
        labelmap_url,
        test_images_index_url,
        model_url,
        input_tensors: task.input_tensor_metadata,
        output_heads: task.output_head_metadata,
    })
}

/// Fetches and decodes the metadata document at `url`.
pub async fn fetch_metadata<F: Fetcher + ?Sized>(fetcher: &F, url: &Url) -> Result<ModelMetadata> {
    let bytes = fetcher
        .fetch(url)
        .await
        .map_err(|source| VisionError::MetadataFetch {
            url: url.to_string(),
            source,
        })?;
    parse_metadata(url, &bytes)
}
