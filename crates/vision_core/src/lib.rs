//! Metadata, label map and classification-result pipeline for vision
//! models served next to a JSON metadata document.

pub mod config;
pub mod error;
pub mod fetch;
pub mod labelmap;
pub mod metadata;
pub mod model;
pub mod orchestrator;
#[cfg(feature = "ort")]
pub mod ort_backend;
pub mod preprocess;
pub mod results;
pub mod test_images;

pub use config::{HttpConfig, ModelConfig, PreprocessConfig, VisionConfig};
pub use error::{Result, VisionError};
pub use fetch::{FetchError, Fetcher, HttpFetcher};
pub use labelmap::{LabelEntry, LabelMap, UNKNOWN_LABEL, build_label_map, parse_label_map};
pub use metadata::{
    InputTensorSpec, ModelMetadata, ModelType, OutputHeadSpec, fetch_metadata, parse_metadata,
};
pub use model::{ModelExecutor, ModelLoader};
pub use orchestrator::{Orchestrator, Session, SessionState};
pub use preprocess::{InputTensor, prepare_input};
pub use results::{ClassificationResult, build_classifier_results, softmax};
pub use test_images::{TestImageEntry, derive_test_images, resolve_test_images};

/// Re-exported so callers can build URLs without a direct `url` dependency.
pub use reqwest::Url;
