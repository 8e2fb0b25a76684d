//! AIGC Sentinel Classifiers
//!
//! Model runtime for scoring text windows with a fine-tuned sequence
//! classifier.
//!
//! The crate is split along the lifecycle of the model:
//! - [`model_assets`] locates and validates the on-disk model directory
//! - [`device`] picks CPU or an accelerator under a memory floor
//! - [`candle_model`] loads BERT-family weights with Candle
//! - [`runtime`] owns the loaded model, serializes inference and releases it
//!
//! Everything device-bound is blocking; async callers run it through
//! `spawn_blocking`.

pub mod batch_policy;
pub mod candle_model;
pub mod classifier;
pub mod device;
pub mod model_assets;
pub mod runtime;

pub use batch_policy::AdaptiveBatchPolicy;
pub use candle_model::{CandleModelLoader, CandleSequenceClassifier};
pub use classifier::{LoadedModel, ModelLoader, SequenceClassifier};
pub use device::{select_device, AcceleratorInfo, DeviceProbe, StaticDeviceProbe, SystemDeviceProbe};
pub use model_assets::{
    resolve_model_dir, HfTokenizer, ModelAssets, ModelManifest, WeightsSource,
};
pub use runtime::{Inference, ModelRuntime, RuntimeHandle, RuntimeInfo};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::classifier::{LoadedModel, ModelLoader, SequenceClassifier};
    pub use crate::device::{DeviceProbe, SystemDeviceProbe};
    pub use crate::runtime::{ModelRuntime, RuntimeHandle, RuntimeInfo};
    pub use crate::CandleModelLoader;
}
