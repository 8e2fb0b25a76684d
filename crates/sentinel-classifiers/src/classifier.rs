//! Classifier and loader traits

use sentinel_core::{ExecutionDevice, Result, Tokenize};
use std::path::Path;
use std::sync::Arc;

/// A sequence classifier that scores batches of window text.
///
/// Calls are blocking and device-bound; callers run them off the async
/// executor and never concurrently against the same instance.
pub trait SequenceClassifier: Send + Sync {
    /// AI-probabilities in [0, 1], same order and count as `texts`
    fn predict(&self, texts: &[String]) -> Result<Vec<f32>>;

    /// Get the classifier name
    fn name(&self) -> &str;
}

/// Classifier, tokenizer and device context produced by a loader
pub struct LoadedModel {
    /// Batched classifier bound to `device`
    pub classifier: Box<dyn SequenceClassifier>,

    /// Tokenizer used for segmentation (no truncation, no special tokens)
    pub tokenizer: Arc<dyn Tokenize>,

    /// Device the weights were placed on
    pub device: ExecutionDevice,

    /// Content tokens the model accepts per window, special tokens excluded
    pub max_content_tokens: usize,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("classifier", &self.classifier.name())
            .field("device", &self.device)
            .field("max_content_tokens", &self.max_content_tokens)
            .finish()
    }
}

/// Loads model weights and tokenizer onto a device
pub trait ModelLoader: Send + Sync {
    /// Check that the model assets exist without touching any device
    fn validate(&self) -> Result<()>;

    /// Load onto the given device
    fn load(&self, device: &ExecutionDevice) -> Result<LoadedModel>;

    /// Directory the assets are read from
    fn model_dir(&self) -> &Path;
}
