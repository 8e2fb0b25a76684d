//! Model runtime: lazy loading, serialized inference, and release
//!
//! The runtime owns the one loaded model of the process. It is created
//! empty, loads on first use, and frees its device memory on `release()`.
//! All device calls go through a single lock, so at most one batch
//! executes at a time no matter how many callers hold the handle.

use crate::batch_policy::AdaptiveBatchPolicy;
use crate::classifier::{LoadedModel, ModelLoader};
use crate::device::{select_device, DeviceProbe};
use parking_lot::Mutex;
use sentinel_core::{DevicePreference, Error, ExecutionDevice, Result, ScoringConfig, Tokenize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Shared, explicitly owned handle to the process's model runtime
pub type RuntimeHandle = Arc<ModelRuntime>;

/// What a run needs from a loaded runtime
#[derive(Clone)]
pub struct RuntimeInfo {
    /// Device the model runs on
    pub device: ExecutionDevice,

    /// Tokenizer for segmentation
    pub tokenizer: Arc<dyn Tokenize>,

    /// Content tokens the model accepts per window
    pub max_content_tokens: usize,
}

impl std::fmt::Debug for RuntimeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeInfo")
            .field("device", &self.device)
            .field("max_content_tokens", &self.max_content_tokens)
            .finish()
    }
}

/// Output of one `infer` call
#[derive(Debug, Clone, PartialEq)]
pub struct Inference {
    /// AI-probabilities, same order and count as the input
    pub probabilities: Vec<f32>,

    /// Whether the batch only succeeded after the halved retry
    pub retried: bool,
}

/// Lazily loaded, serialized model runtime
pub struct ModelRuntime {
    loader: Arc<dyn ModelLoader>,
    probe: Arc<dyn DeviceProbe>,
    preference: DevicePreference,
    min_gpu_memory_bytes: u64,
    slot: Mutex<Option<LoadedModel>>,
    policy: Mutex<AdaptiveBatchPolicy>,
    last_used: Mutex<Instant>,
    loads: AtomicU64,
}

impl ModelRuntime {
    /// Create an unloaded runtime
    pub fn new(
        loader: Arc<dyn ModelLoader>,
        probe: Arc<dyn DeviceProbe>,
        config: &ScoringConfig,
    ) -> Self {
        Self {
            loader,
            probe,
            preference: config.device,
            min_gpu_memory_bytes: config.min_gpu_memory_bytes,
            slot: Mutex::new(None),
            policy: Mutex::new(AdaptiveBatchPolicy::from_config(config)),
            last_used: Mutex::new(Instant::now()),
            loads: AtomicU64::new(0),
        }
    }

    /// Wrap in a shareable handle
    pub fn into_handle(self) -> RuntimeHandle {
        Arc::new(self)
    }

    /// Load the model if needed and describe it. Blocking.
    pub fn acquire(&self) -> Result<RuntimeInfo> {
        let mut slot = self.slot.lock();
        let model = self.ensure_loaded(&mut slot)?;
        self.touch();
        Ok(RuntimeInfo {
            device: model.device.clone(),
            tokenizer: Arc::clone(&model.tokenizer),
            max_content_tokens: model.max_content_tokens,
        })
    }

    /// Batch size the next `infer` call should use
    pub fn batch_size(&self) -> usize {
        self.policy.lock().current()
    }

    /// Score a batch of window texts. Blocking.
    ///
    /// A failed forward pass is retried once with the batch split into
    /// halves; a second failure is returned to the caller.
    pub fn infer(&self, texts: &[String]) -> Result<Inference> {
        if texts.is_empty() {
            return Ok(Inference {
                probabilities: Vec::new(),
                retried: false,
            });
        }

        let mut slot = self.slot.lock();
        let model = self.ensure_loaded(&mut slot)?;
        self.touch();

        let result = match predict_checked(model, texts) {
            Ok(probabilities) => {
                self.policy.lock().record_success();
                Ok(Inference {
                    probabilities,
                    retried: false,
                })
            }
            Err(e) if e.is_retryable() => {
                let chunk = {
                    let mut policy = self.policy.lock();
                    let next = policy.record_failure();
                    let chunk = policy.retry_chunk(texts.len());
                    warn!(
                        "Batch of {} failed ({}), retrying in chunks of {} (next batch size {})",
                        texts.len(),
                        e,
                        chunk,
                        next
                    );
                    chunk
                };
                metrics::counter!("sentinel_inference_retries_total").increment(1);

                let mut probabilities = Vec::with_capacity(texts.len());
                for part in texts.chunks(chunk) {
                    probabilities.extend(predict_checked(model, part)?);
                }
                Ok(Inference {
                    probabilities,
                    retried: true,
                })
            }
            Err(e) => Err(e),
        };

        self.touch();
        result
    }

    /// Drop the loaded model and free its device memory
    pub fn release(&self) -> bool {
        let released = self.slot.lock().take();
        match released {
            Some(model) => {
                info!("Released model runtime on {}", model.device);
                true
            }
            None => false,
        }
    }

    /// Release if unused for at least `idle`; a busy runtime is never idle
    pub fn release_if_idle(&self, idle: Duration) -> bool {
        let Some(mut slot) = self.slot.try_lock() else {
            return false;
        };
        if slot.is_none() || self.last_used.lock().elapsed() < idle {
            return false;
        }
        if let Some(model) = slot.take() {
            info!(
                "Released idle model runtime on {} after {:?}",
                model.device, idle
            );
        }
        true
    }

    /// Whether a model is currently loaded
    pub fn is_loaded(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Number of times the model has been loaded
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    fn ensure_loaded<'a>(&self, slot: &'a mut Option<LoadedModel>) -> Result<&'a LoadedModel> {
        if slot.is_none() {
            *slot = Some(self.load()?);
        }
        slot.as_ref()
            .ok_or_else(|| Error::internal("model slot empty after load"))
    }

    fn load(&self) -> Result<LoadedModel> {
        self.loader.validate()?;

        let device = select_device(
            self.preference,
            self.probe.as_ref(),
            self.min_gpu_memory_bytes,
        );
        info!(
            "Loading model from {} on {}",
            self.loader.model_dir().display(),
            device
        );
        let started = Instant::now();

        let model = match self.loader.load(&device) {
            Ok(model) => model,
            Err(e) if matches!(device, ExecutionDevice::Gpu { .. }) => {
                let reason = format!("{} initialization failed: {}", device, e);
                warn!("Falling back to CPU: {}", reason);
                self.loader.load(&ExecutionDevice::cpu_fallback(reason))?
            }
            Err(e) => return Err(e),
        };

        self.loads.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sentinel_model_loads_total").increment(1);
        debug!("Model ready in {:?}", started.elapsed());
        Ok(model)
    }
}

fn predict_checked(model: &LoadedModel, texts: &[String]) -> Result<Vec<f32>> {
    let probabilities = model.classifier.predict(texts)?;
    if probabilities.len() != texts.len() {
        return Err(Error::inference(format!(
            "classifier returned {} scores for {} inputs",
            probabilities.len(),
            texts.len()
        )));
    }
    if let Some(bad) = probabilities.iter().find(|p| !p.is_finite()) {
        return Err(Error::inference(format!(
            "classifier returned a non-finite score ({})",
            bad
        )));
    }
    Ok(probabilities
        .into_iter()
        .map(|p| p.clamp(0.0, 1.0))
        .collect())
}
