//! Candle sequence classifiers for AI-generated text detection
//!
//! Supports BERT-family checkpoints (`model_type: bert`) with an optional
//! pooler and a linear head, and RoBERTa/XLM-RoBERTa sequence classifiers.

use crate::classifier::{LoadedModel, ModelLoader, SequenceClassifier};
use crate::model_assets::{
    load_tokenizer, HfTokenizer, ModelAssets, ModelManifest, WeightsSource,
};
use candle_core::{DType, Device, IndexOp, Tensor, D};
use candle_nn::{Linear, Module, VarBuilder};
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use candle_transformers::models::xlm_roberta::{
    Config as XlmRobertaConfig, XLMRobertaForSequenceClassification,
};
use sentinel_core::{Accelerator, Error, ExecutionDevice, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};
use tracing::info;

/// Loads a HuggingFace checkpoint directory with Candle
#[derive(Debug, Clone)]
pub struct CandleModelLoader {
    dir: PathBuf,
    max_tokens: usize,
    temperature: f32,
}

impl CandleModelLoader {
    /// Create a loader for a model directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_tokens: 510,
            temperature: 1.0,
        }
    }

    /// Cap on content tokens per window
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Logit temperature applied before softmax
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn load_inner(&self, device: &ExecutionDevice) -> Result<LoadedModel> {
        let assets = ModelAssets::locate(&self.dir)?;
        let manifest = ModelManifest::from_file(&assets.config)?;
        let candle_device = create_device(device)?;

        let base_tokenizer = load_tokenizer(&assets)?;
        let max_length = manifest.max_sequence_length();
        let max_content_tokens = self.max_tokens.min(max_length.saturating_sub(2)).max(1);

        let tokenizer = batch_tokenizer(&base_tokenizer, &manifest, max_length, &self.dir)?;
        let vb = load_var_builder(&assets, &candle_device)?;
        let num_labels = manifest.num_labels();

        let backbone = if manifest.is_roberta() {
            let config: XlmRobertaConfig = parse_json_config(&assets.config, &self.dir)?;
            Backbone::XlmRoberta(load_xlm_roberta(&vb, num_labels, &config, &self.dir)?)
        } else {
            let config: BertConfig = parse_json_config(&assets.config, &self.dir)?;
            let (model, prefix) = load_bert_backbone(&vb, &config, &self.dir)?;
            let pooler_vb = if prefix.is_empty() {
                vb.pp("pooler")
            } else {
                vb.pp(prefix).pp("pooler")
            };
            let pooler =
                candle_nn::linear(config.hidden_size, config.hidden_size, pooler_vb.pp("dense"))
                    .ok();
            let head = load_classification_head(&vb, config.hidden_size, num_labels, &self.dir)?;
            Backbone::Bert {
                model,
                pooler,
                head,
            }
        };

        let name = self
            .dir
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("aigc-detector")
            .to_string();

        info!(
            "Loaded {} classifier '{}' on {} ({} labels, AI label {}, max length {})",
            manifest.model_type,
            name,
            device,
            num_labels,
            manifest.ai_label_index(),
            max_length
        );

        Ok(LoadedModel {
            classifier: Box::new(CandleSequenceClassifier {
                name,
                tokenizer,
                backbone,
                device: candle_device,
                ai_label: manifest.ai_label_index(),
                temperature: self.temperature,
            }),
            tokenizer: Arc::new(HfTokenizer::new(base_tokenizer)),
            device: device.clone(),
            max_content_tokens,
        })
    }
}

impl ModelLoader for CandleModelLoader {
    fn validate(&self) -> Result<()> {
        ModelAssets::locate(&self.dir).map(|_| ())
    }

    fn load(&self, device: &ExecutionDevice) -> Result<LoadedModel> {
        self.load_inner(device)
    }

    fn model_dir(&self) -> &Path {
        &self.dir
    }
}

enum Backbone {
    Bert {
        model: BertModel,
        pooler: Option<Linear>,
        head: Linear,
    },
    XlmRoberta(XLMRobertaForSequenceClassification),
}

/// Batched classifier over a loaded Candle model
pub struct CandleSequenceClassifier {
    name: String,
    tokenizer: Tokenizer,
    backbone: Backbone,
    device: Device,
    ai_label: usize,
    temperature: f32,
}

impl CandleSequenceClassifier {
    fn logits(&self, texts: &[String]) -> candle_core::Result<Tensor> {
        let inputs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let encodings = self
            .tokenizer
            .encode_batch(inputs, true)
            .map_err(|e| candle_core::Error::Msg(format!("tokenization failed: {}", e)))?;

        let batch = encodings.len();
        let seq_len = encodings.first().map(|e| e.len()).unwrap_or(0);
        if encodings.iter().any(|e| e.len() != seq_len) {
            return Err(candle_core::Error::Msg(
                "padded encodings differ in length".to_string(),
            ));
        }

        let mut ids = Vec::with_capacity(batch * seq_len);
        let mut type_ids = Vec::with_capacity(batch * seq_len);
        let mut mask = Vec::with_capacity(batch * seq_len);
        for encoding in &encodings {
            ids.extend_from_slice(encoding.get_ids());
            type_ids.extend_from_slice(encoding.get_type_ids());
            mask.extend_from_slice(encoding.get_attention_mask());
        }

        let input_ids = Tensor::from_vec(ids, (batch, seq_len), &self.device)?;
        let token_type_ids = Tensor::from_vec(type_ids, (batch, seq_len), &self.device)?;
        let attention_mask = Tensor::from_vec(mask, (batch, seq_len), &self.device)?;

        match &self.backbone {
            Backbone::Bert {
                model,
                pooler,
                head,
            } => {
                let hidden = model.forward(&input_ids, &token_type_ids, Some(&attention_mask))?;
                let cls = hidden.i((.., 0))?;
                let pooled = match pooler {
                    Some(pooler) => pooler.forward(&cls)?.tanh()?,
                    None => cls,
                };
                head.forward(&pooled)
            }
            Backbone::XlmRoberta(model) => {
                model.forward(&input_ids, &attention_mask, &token_type_ids)
            }
        }
    }

    fn probabilities(&self, logits: &Tensor) -> candle_core::Result<Vec<f32>> {
        let scaled = logits
            .to_dtype(DType::F32)?
            .affine(1.0 / self.temperature as f64, 0.0)?;

        if scaled.dim(D::Minus1)? == 1 {
            let probs = candle_nn::ops::sigmoid(&scaled)?.squeeze(D::Minus1)?;
            return probs.to_vec1::<f32>();
        }

        let probs = candle_nn::ops::softmax(&scaled, D::Minus1)?;
        probs.i((.., self.ai_label))?.to_vec1::<f32>()
    }
}

impl SequenceClassifier for CandleSequenceClassifier {
    fn predict(&self, texts: &[String]) -> Result<Vec<f32>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let logits = self
            .logits(texts)
            .map_err(|e| Error::inference(format!("forward pass failed: {}", e)))?;

        self.probabilities(&logits)
            .map_err(|e| Error::inference(format!("failed to read probabilities: {}", e)))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Create a Candle device for an execution target
pub fn create_device(device: &ExecutionDevice) -> Result<Device> {
    match device {
        ExecutionDevice::Cpu { .. } => Ok(Device::Cpu),
        ExecutionDevice::Gpu {
            accelerator: Accelerator::Cuda,
            ordinal,
        } => Device::new_cuda(*ordinal)
            .map_err(|e| Error::inference(format!("failed to initialize CUDA: {}", e))),
        ExecutionDevice::Gpu {
            accelerator: Accelerator::Metal,
            ordinal,
        } => Device::new_metal(*ordinal)
            .map_err(|e| Error::inference(format!("failed to initialize Metal: {}", e))),
    }
}

fn batch_tokenizer(
    base: &Tokenizer,
    manifest: &ModelManifest,
    max_length: usize,
    dir: &Path,
) -> Result<Tokenizer> {
    let mut tokenizer = base.clone();

    let (pad_token, pad_id) = ["[PAD]", "<pad>"]
        .iter()
        .find_map(|token| {
            tokenizer
                .token_to_id(token)
                .map(|id| (token.to_string(), id))
        })
        .unwrap_or_else(|| ("[PAD]".to_string(), manifest.pad_token_id.unwrap_or(0)));

    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length,
            ..Default::default()
        }))
        .map_err(|e| Error::model_load(dir, format!("invalid truncation settings: {}", e)))?;
    tokenizer.with_padding(Some(PaddingParams {
        strategy: PaddingStrategy::BatchLongest,
        pad_id,
        pad_token,
        ..Default::default()
    }));

    Ok(tokenizer)
}

fn parse_json_config<T: DeserializeOwned>(config_path: &Path, dir: &Path) -> Result<T> {
    let config_str = std::fs::read_to_string(config_path)
        .map_err(|e| Error::model_load(dir, format!("failed to read config: {}", e)))?;

    serde_json::from_str(&config_str)
        .map_err(|e| Error::model_load(dir, format!("failed to parse config: {}", e)))
}

fn load_var_builder(assets: &ModelAssets, device: &Device) -> Result<VarBuilder<'static>> {
    let loaded = match &assets.weights {
        // SAFETY: the weights file is memory-mapped read-only and not
        // modified while the model is alive.
        WeightsSource::SafeTensors(path) => unsafe {
            VarBuilder::from_mmaped_safetensors(&[path.clone()], DType::F32, device)
        },
        WeightsSource::PyTorch(path) => VarBuilder::from_pth(path, DType::F32, device),
    };
    loaded.map_err(|e| {
        Error::model_load(
            &assets.dir,
            format!(
                "failed to load weights from {}: {}",
                assets.weights.path().display(),
                e
            ),
        )
    })
}

fn load_bert_backbone(
    vb: &VarBuilder,
    config: &BertConfig,
    dir: &Path,
) -> Result<(BertModel, &'static str)> {
    let mut errors = Vec::new();

    for prefix in ["bert", ""] {
        let vb_prefix = if prefix.is_empty() {
            vb.clone()
        } else {
            vb.pp(prefix)
        };

        match BertModel::load(vb_prefix, config) {
            Ok(model) => {
                let effective_prefix = if prefix.is_empty() { "<root>" } else { prefix };
                info!("Loaded BERT backbone from '{}'", effective_prefix);
                return Ok((model, prefix));
            }
            Err(e) => {
                errors.push(format!(
                    "{}: {}",
                    if prefix.is_empty() { "<root>" } else { prefix },
                    e
                ));
            }
        }
    }

    Err(Error::model_load(
        dir,
        format!(
            "failed to load BERT backbone with tried prefixes [{}]",
            errors.join(" | ")
        ),
    ))
}

fn load_xlm_roberta(
    vb: &VarBuilder,
    num_labels: usize,
    config: &XlmRobertaConfig,
    dir: &Path,
) -> Result<XLMRobertaForSequenceClassification> {
    let mut errors = Vec::new();

    for prefix in ["", "model"] {
        let vb_prefix = if prefix.is_empty() {
            vb.clone()
        } else {
            vb.pp(prefix)
        };

        match XLMRobertaForSequenceClassification::new(num_labels, config, vb_prefix) {
            Ok(model) => {
                let effective_prefix = if prefix.is_empty() { "<root>" } else { prefix };
                info!("Loaded RoBERTa classifier from '{}'", effective_prefix);
                return Ok(model);
            }
            Err(e) => {
                errors.push(format!(
                    "{}: {}",
                    if prefix.is_empty() { "<root>" } else { prefix },
                    e
                ));
            }
        }
    }

    Err(Error::model_load(
        dir,
        format!(
            "failed to load RoBERTa classifier with tried prefixes [{}]",
            errors.join(" | ")
        ),
    ))
}

/// Fails when no trained head is present; random heads are never substituted.
fn load_classification_head(
    vb: &VarBuilder,
    hidden_size: usize,
    num_labels: usize,
    dir: &Path,
) -> Result<Linear> {
    for prefix in ["classifier", "score"] {
        if let Ok(linear) = candle_nn::linear(hidden_size, num_labels, vb.pp(prefix)) {
            info!(
                "Loaded classification head from '{}' (hidden_size={}, num_labels={})",
                prefix, hidden_size, num_labels
            );
            return Ok(linear);
        }
    }

    Err(Error::model_load(
        dir,
        "no trained classification head found (tried 'classifier', 'score')",
    ))
}
