//! Load sequence and classification loop for one model.
//!
//! Metadata is fetched first. The label map, the test-image index and the
//! model graph are then loaded concurrently, and the resulting [`Session`]
//! is frozen before the orchestrator reports [`SessionState::Ready`].

use crate::config::PreprocessConfig;
use crate::error::{Result, VisionError};
use crate::fetch::{Fetcher, parse_url};
use crate::labelmap::{LabelMap, parse_label_map};
use crate::metadata::{ModelMetadata, ModelType, fetch_metadata};
use crate::model::{ModelExecutor, ModelLoader};
use crate::preprocess::{InputTensor, prepare_input};
use crate::results::{ClassificationResult, build_classifier_results};
use crate::test_images::{TestImageEntry, resolve_test_images};
use reqwest::Url;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    MetadataLoading,
    MetadataLoaded,
    ModelLoading,
    Ready,
    Classifying,
    /// Initialization failed; a new `load` is required.
    Error,
}

/// Everything loaded for one model. Read-only once built.
pub struct Session {
    metadata: ModelMetadata,
    label_map: LabelMap,
    test_images: Vec<TestImageEntry>,
    model: Arc<dyn ModelExecutor>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("metadata", &self.metadata)
            .field("label_map", &self.label_map.len())
            .field("test_images", &self.test_images.len())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    pub fn label_map(&self) -> &LabelMap {
        &self.label_map
    }

    pub fn test_images(&self) -> &[TestImageEntry] {
        &self.test_images
    }

    /// Labels raw scores using the session label map and head threshold.
    pub fn results_for_scores(&self, scores: &[f32]) -> Result<Vec<ClassificationResult>> {
        if self.metadata.model_type != ModelType::Classifier {
            return Err(VisionError::UnsupportedModelType(self.metadata.model_type));
        }
        Ok(build_classifier_results(
            scores,
            &self.label_map,
            self.metadata.score_threshold(),
        ))
    }

    async fn run(&self, input: &InputTensor) -> Result<Vec<ClassificationResult>> {
        if self.metadata.model_type != ModelType::Classifier {
            return Err(VisionError::UnsupportedModelType(self.metadata.model_type));
        }
        let scores = self
            .model
            .execute(input)
            .await
            .map_err(VisionError::Execution)?;
        self.results_for_scores(&scores)
    }
}

/// Drives the load sequence and serializes classification requests.
pub struct Orchestrator<F, L> {
    fetcher: F,
    loader: L,
    preprocess: PreprocessConfig,
    state: SessionState,
    session: Option<Session>,
}

impl<F: Fetcher, L: ModelLoader> Orchestrator<F, L> {
    pub fn new(fetcher: F, loader: L, preprocess: PreprocessConfig) -> Self {
        Self {
            fetcher,
            loader,
            preprocess,
            state: SessionState::Uninitialized,
            session: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    fn fail(&mut self, err: VisionError) -> VisionError {
        tracing::error!("model load failed: {err}");
        self.session = None;
        self.transition(SessionState::Error);
        err
    }

    /// Loads the model described by the metadata document at `metadata_url`.
    ///
    /// A missing or unparsable URL is rejected before any request is made.
    /// Label map and test-image failures only leave those resources empty.
    pub async fn load(&mut self, metadata_url: Option<&str>) -> Result<&Session> {
        let raw = metadata_url
            .filter(|u| !u.trim().is_empty())
            .ok_or(VisionError::MissingParameter("metadata url"))?;
        let url = parse_url(raw)?;

        self.session = None;
        self.transition(SessionState::MetadataLoading);
        let metadata = match fetch_metadata(&self.fetcher, &url).await {
            Ok(m) => m,
            Err(e) => return Err(self.fail(e)),
        };
        self.transition(SessionState::MetadataLoaded);

        self.transition(SessionState::ModelLoading);
        let (label_map, test_images, model) = tokio::join!(
            load_label_map(&self.fetcher, metadata.labelmap_url.as_ref()),
            load_test_images(&self.fetcher, metadata.test_images_index_url.as_ref()),
            self.loader.load(&metadata),
        );
        let model = match model {
            Ok(m) => m,
            Err(e) => return Err(self.fail(VisionError::Execution(e))),
        };

        tracing::info!(
            model_type = ?metadata.model_type,
            labels = label_map.len(),
            test_images = test_images.len(),
            "model ready"
        );
        self.transition(SessionState::Ready);
        Ok(self.session.insert(Session {
            metadata,
            label_map,
            test_images,
            model,
        }))
    }

    /// Classifies encoded image bytes with the loaded model.
    pub async fn classify_image(&mut self, bytes: &[u8]) -> Result<Vec<ClassificationResult>> {
        let session = self.ready_session()?;
        let input = prepare_input(
            bytes,
            &self.preprocess,
            session.metadata.input_tensors.first(),
        )?;
        self.classify_tensor(&input).await
    }

    /// Fetches one of the session's test images and classifies it.
    pub async fn classify_test_image(
        &mut self,
        entry: &TestImageEntry,
    ) -> Result<Vec<ClassificationResult>> {
        self.ready_session()?;
        let url = parse_url(&entry.image_url)?;
        let bytes = self
            .fetcher
            .fetch(&url)
            .await
            .map_err(|e| VisionError::TestImageFetch {
                url: entry.image_url.clone(),
                reason: e.to_string(),
            })?;
        self.classify_image(&bytes).await
    }

    /// Runs an already prepared tensor through the model.
    pub async fn classify_tensor(
        &mut self,
        input: &InputTensor,
    ) -> Result<Vec<ClassificationResult>> {
        let ready = self.state == SessionState::Ready;
        let Some(session) = self.session.as_ref().filter(|_| ready) else {
            return Err(VisionError::NotReady);
        };
        tracing::debug!(from = ?self.state, to = ?SessionState::Classifying, "session state");
        self.state = SessionState::Classifying;
        let _back_to_ready = ReadyOnDrop(&mut self.state);
        session.run(input).await
    }

    fn ready_session(&self) -> Result<&Session> {
        match (&self.session, self.state) {
            (Some(session), SessionState::Ready) => Ok(session),
            _ => Err(VisionError::NotReady),
        }
    }
}

/// Puts the state back to `Ready` even when a classification future is
/// dropped before completing.
struct ReadyOnDrop<'a>(&'a mut SessionState);

impl Drop for ReadyOnDrop<'_> {
    fn drop(&mut self) {
        *self.0 = SessionState::Ready;
    }
}

async fn load_label_map<F: Fetcher + ?Sized>(fetcher: &F, url: Option<&Url>) -> LabelMap {
    let Some(url) = url else {
        tracing::warn!("metadata has no label map; labels will be unknown");
        return LabelMap::empty();
    };
    let loaded = match fetcher.fetch(url).await {
        Ok(bytes) => parse_label_map(&bytes).map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    loaded.unwrap_or_else(|reason| {
        let err = VisionError::LabelMapFetch {
            url: url.to_string(),
            reason,
        };
        tracing::warn!("{err}");
        LabelMap::empty()
    })
}

async fn load_test_images<F: Fetcher + ?Sized>(
    fetcher: &F,
    url: Option<&Url>,
) -> Vec<TestImageEntry> {
    let Some(url) = url else {
        return Vec::new();
    };
    resolve_test_images(fetcher, url).await.unwrap_or_else(|err| {
        tracing::warn!("{err}");
        Vec::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::MemoryFetcher;
    use crate::model::testing::FixedLoader;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;

    const META_URL: &str = "https://models.example/flowers/metadata.json";

    const METADATA: &str = r#"{
        "tfjs_classifier_model_metadata": {
            "input_tensor_metadata": [{"shape": [1, 16, 16, 3]}],
            "output_head_metadata": [{"labelmap_path": "labelmap.json", "score_threshold": 0.5}]
        },
        "test_images_index_path": "test_images/index.json"
    }"#;

    const LABELMAP: &str = r#"{"item": [
        {"id": 1, "name": "daisy"},
        {"id": 2, "name": "rose", "display_name": "Rose"}
    ]}"#;

    fn full_fetcher() -> MemoryFetcher {
        MemoryFetcher::default()
            .with(META_URL, METADATA)
            .with("https://models.example/flowers/labelmap.json", LABELMAP)
            .with(
                "https://models.example/flowers/test_images/index.json",
                r#"["a.jpg", "b.png"]"#,
            )
    }

    fn png(color: [u8; 3]) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::from_pixel(20, 20, image::Rgb(color)))
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[tokio::test]
    async fn missing_url_fails_before_any_request() {
        for url in [None, Some(""), Some("   ")] {
            let (loader, _) = FixedLoader::scores(vec![]);
            let mut orch = Orchestrator::new(full_fetcher(), loader, PreprocessConfig::default());
            let err = orch.load(url).await.unwrap_err();
            assert!(matches!(err, VisionError::MissingParameter(_)));
            assert_eq!(orch.state(), SessionState::Uninitialized);
            assert!(orch.fetcher.requests().is_empty());
        }
    }

    #[tokio::test]
    async fn loads_everything_and_reaches_ready() -> Result<()> {
        let (loader, _) = FixedLoader::scores(vec![0.1, 0.7, 0.6]);
        let mut orch = Orchestrator::new(full_fetcher(), loader, PreprocessConfig::default());
        let session = orch.load(Some(META_URL)).await?;
        assert_eq!(session.label_map().iter().collect::<Vec<_>>(), vec!["unknown", "daisy", "Rose"]);
        assert_eq!(session.test_images().len(), 2);
        assert_eq!(
            session.test_images()[1].thumbnail_url,
            "https://models.example/flowers/test_images/b_thumb.png"
        );
        assert_eq!(orch.state(), SessionState::Ready);
        Ok(())
    }

    #[tokio::test]
    async fn classifies_image_with_session_threshold_and_labels() -> Result<()> {
        let (loader, exec) = FixedLoader::scores(vec![0.1, 0.7, 0.6]);
        let mut orch = Orchestrator::new(full_fetcher(), loader, PreprocessConfig::default());
        orch.load(Some(META_URL)).await?;

        let results = orch.classify_image(&png([10, 200, 30])).await?;
        let names: Vec<_> = results.iter().map(|r| r.display_name.as_str()).collect();
        assert_eq!(names, vec!["daisy", "Rose"]);
        assert_eq!(orch.state(), SessionState::Ready);
        assert_eq!(exec.seen_shapes.lock().unwrap()[0], vec![1, 16, 16, 3]);
        Ok(())
    }

    #[tokio::test]
    async fn classifies_test_image_by_fetching_it() -> Result<()> {
        let (loader, _) = FixedLoader::scores(vec![0.9]);
        let fetcher = full_fetcher().with("https://models.example/flowers/test_images/a.jpg", png([1, 2, 3]));
        let mut orch = Orchestrator::new(fetcher, loader, PreprocessConfig::default());
        let entry = orch.load(Some(META_URL)).await?.test_images()[0].clone();
        let results = orch.classify_test_image(&entry).await?;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].display_name, "unknown");

        let missing = orch.session().unwrap().test_images()[1].clone();
        let err = orch.classify_test_image(&missing).await.unwrap_err();
        assert!(matches!(err, VisionError::TestImageFetch { .. }));
        assert_eq!(orch.state(), SessionState::Ready);
        Ok(())
    }

    #[tokio::test]
    async fn aux_failures_degrade_to_empty_resources() -> Result<()> {
        let (loader, _) = FixedLoader::scores(vec![0.6, 0.8, 0.4]);
        let fetcher = MemoryFetcher::default().with(META_URL, METADATA);
        let mut orch = Orchestrator::new(fetcher, loader, PreprocessConfig::default());
        let session = orch.load(Some(META_URL)).await?;
        assert!(session.label_map().is_empty());
        assert!(session.test_images().is_empty());
        let results = session.results_for_scores(&[0.6, 0.8, 0.4])?;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.display_name == "unknown"));
        assert_eq!(orch.state(), SessionState::Ready);
        Ok(())
    }

    #[tokio::test]
    async fn oversized_label_ids_degrade_to_empty_map() -> Result<()> {
        let (loader, _) = FixedLoader::scores(vec![0.9]);
        let fetcher = full_fetcher().with(
            "https://models.example/flowers/labelmap.json",
            r#"{"item": [{"id": 9223372036854775807, "name": "huge"}, {"id": 1, "name": "daisy"}]}"#,
        );
        let mut orch = Orchestrator::new(fetcher, loader, PreprocessConfig::default());
        let session = orch.load(Some(META_URL)).await?;
        assert!(session.label_map().is_empty());
        assert_eq!(session.test_images().len(), 2);
        assert_eq!(orch.state(), SessionState::Ready);
        Ok(())
    }

    struct NeverFinishes;

    #[async_trait::async_trait]
    impl ModelExecutor for NeverFinishes {
        async fn execute(&self, _input: &InputTensor) -> anyhow::Result<Vec<f32>> {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    struct NeverFinishesLoader;

    #[async_trait::async_trait]
    impl ModelLoader for NeverFinishesLoader {
        async fn load(&self, _metadata: &ModelMetadata) -> anyhow::Result<Arc<dyn ModelExecutor>> {
            Ok(Arc::new(NeverFinishes))
        }
    }

    #[tokio::test]
    async fn dropped_classification_returns_to_ready() -> Result<()> {
        let mut orch = Orchestrator::new(full_fetcher(), NeverFinishesLoader, PreprocessConfig::default());
        orch.load(Some(META_URL)).await?;
        let input = InputTensor::zeros((1, 16, 16, 3));
        tokio::select! {
            biased;
            _ = orch.classify_tensor(&input) => panic!("executor should never finish"),
            _ = std::future::ready(()) => {}
        }
        assert_eq!(orch.state(), SessionState::Ready);
        assert!(orch.session().is_some());
        Ok(())
    }

    #[tokio::test]
    async fn malformed_label_map_is_not_fatal() -> Result<()> {
        let (loader, _) = FixedLoader::scores(vec![]);
        let fetcher = full_fetcher().with(
            "https://models.example/flowers/labelmap.json",
            r#"{"item": [{"id": -4, "name": "bad"}]}"#,
        );
        let mut orch = Orchestrator::new(fetcher, loader, PreprocessConfig::default());
        let session = orch.load(Some(META_URL)).await?;
        assert!(session.label_map().is_empty());
        assert_eq!(session.test_images().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn metadata_failures_end_in_error_state() {
        let (loader, _) = FixedLoader::scores(vec![]);
        let mut orch = Orchestrator::new(MemoryFetcher::default(), loader, PreprocessConfig::default());
        let err = orch.load(Some(META_URL)).await.unwrap_err();
        assert!(matches!(err, VisionError::MetadataFetch { .. }));
        assert_eq!(orch.state(), SessionState::Error);

        let (loader, _) = FixedLoader::scores(vec![]);
        let fetcher = MemoryFetcher::default().with(META_URL, r#"{"something_else": {}}"#);
        let mut orch = Orchestrator::new(fetcher, loader, PreprocessConfig::default());
        let err = orch.load(Some(META_URL)).await.unwrap_err();
        assert!(matches!(err, VisionError::MetadataParse { .. }));
        assert_eq!(orch.state(), SessionState::Error);
        assert!(orch.session().is_none());
    }

    #[tokio::test]
    async fn model_load_failure_is_propagated() {
        let mut orch = Orchestrator::new(full_fetcher(), FixedLoader::failing(), PreprocessConfig::default());
        let err = orch.load(Some(META_URL)).await.unwrap_err();
        assert!(matches!(err, VisionError::Execution(_)));
        assert_eq!(err.to_string(), "graph download failed");
        assert_eq!(orch.state(), SessionState::Error);
    }

    #[tokio::test]
    async fn classification_requires_ready_session() {
        let (loader, _) = FixedLoader::scores(vec![0.5]);
        let mut orch = Orchestrator::new(full_fetcher(), loader, PreprocessConfig::default());
        let err = orch.classify_image(&png([0, 0, 0])).await.unwrap_err();
        assert!(matches!(err, VisionError::NotReady));
    }

    #[tokio::test]
    async fn non_classifier_models_cannot_classify() -> Result<()> {
        let (loader, _) = FixedLoader::scores(vec![0.5]);
        let fetcher = MemoryFetcher::default().with(
            META_URL,
            r#"{"tfjs_segmenter_model_metadata": {"output_head_metadata": [{"score_threshold": 0.1}]}}"#,
        );
        let mut orch = Orchestrator::new(fetcher, loader, PreprocessConfig::default());
        orch.load(Some(META_URL)).await?;
        let err = orch.classify_image(&png([0, 0, 0])).await.unwrap_err();
        assert!(matches!(err, VisionError::UnsupportedModelType(ModelType::Segmenter)));
        assert_eq!(orch.state(), SessionState::Ready);
        Ok(())
    }
}
