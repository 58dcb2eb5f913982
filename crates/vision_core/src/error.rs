use crate::fetch::FetchError;
use crate::metadata::ModelType;
use thiserror::Error;

/// Errors surfaced by the metadata, label map and classification pipeline.
#[derive(Debug, Error)]
pub enum VisionError {
    /// A required initialization parameter was not supplied.
    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),

    #[error("invalid url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to fetch metadata from {url}")]
    MetadataFetch {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("invalid metadata document at {url}: {reason}")]
    MetadataParse { url: String, reason: String },

    #[error("failed to load label map from {url}: {reason}")]
    LabelMapFetch { url: String, reason: String },

    #[error("failed to load test images from {url}: {reason}")]
    TestImageFetch { url: String, reason: String },

    #[error("invalid label map: {0}")]
    InvalidLabelMap(String),

    #[error("model type {0:?} does not produce classification results")]
    UnsupportedModelType(ModelType),

    /// Classification was requested before the session reached `Ready`.
    #[error("model is not ready")]
    NotReady,

    #[error("failed to decode image")]
    ImageDecode(#[from] image::ImageError),

    /// Error reported by the model collaborator, passed through as-is.
    #[error(transparent)]
    Execution(anyhow::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, VisionError>;
