//! Model execution seam. Loading and running the graph are delegated to
//! implementations of these traits.

use crate::metadata::ModelMetadata;
use crate::preprocess::InputTensor;
use async_trait::async_trait;
use std::sync::Arc;

/// Runs one inference over a prepared input tensor.
#[async_trait]
pub trait ModelExecutor: Send + Sync {
    /// Returns the per-class scores of the first output head.
    async fn execute(&self, input: &InputTensor) -> anyhow::Result<Vec<f32>>;
}

/// Produces an executor for the model described by `metadata`.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self, metadata: &ModelMetadata) -> anyhow::Result<Arc<dyn ModelExecutor>>;
}

#[async_trait]
impl<T: ModelLoader + ?Sized> ModelLoader for Box<T> {
    async fn load(&self, metadata: &ModelMetadata) -> anyhow::Result<Arc<dyn ModelExecutor>> {
        (**self).load(metadata).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Executor returning fixed scores and recording input shapes.
    pub struct FixedScores {
        pub scores: Vec<f32>,
        pub seen_shapes: Mutex<Vec<Vec<usize>>>,
    }

    #[async_trait]
    impl ModelExecutor for FixedScores {
        async fn execute(&self, input: &InputTensor) -> anyhow::Result<Vec<f32>> {
            self.seen_shapes.lock().unwrap().push(input.shape().to_vec());
            Ok(self.scores.clone())
        }
    }

    pub struct FixedLoader {
        pub executor: Option<Arc<FixedScores>>,
    }

    impl FixedLoader {
        pub fn scores(scores: Vec<f32>) -> (Self, Arc<FixedScores>) {
            let exec = Arc::new(FixedScores {
                scores,
                seen_shapes: Mutex::new(Vec::new()),
            });
            (
                Self {
                    executor: Some(exec.clone()),
                },
                exec,
            )
        }

        pub fn failing() -> Self {
            Self { executor: None }
        }
    }

    #[async_trait]
    impl ModelLoader for FixedLoader {
        async fn load(&self, _metadata: &ModelMetadata) -> anyhow::Result<Arc<dyn ModelExecutor>> {
            match &self.executor {
                Some(exec) => Ok(exec.clone() as Arc<dyn ModelExecutor>),
                None => anyhow::bail!("graph download failed"),
            }
        }
    }
}
