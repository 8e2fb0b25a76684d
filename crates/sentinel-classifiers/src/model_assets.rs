//! Model asset discovery and tokenizer loading

use sentinel_core::{Error, Result, Tokenize};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;
use tracing::debug;

/// Directory name searched for when no model directory is configured
pub const DEFAULT_MODEL_DIR_NAME: &str = "AIGC_Model";

const SAFETENSORS_FILE: &str = "model.safetensors";
const PYTORCH_FILE: &str = "pytorch_model.bin";
const CONFIG_FILE: &str = "config.json";

/// Label keywords that mark the machine-generated class
const AI_LABEL_KEYWORDS: &[&str] = &[
    "ai",
    "fake",
    "chatgpt",
    "gpt",
    "generated",
    "machine",
    "llm",
];

/// Where the tokenizer definition lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenizerSource {
    /// Serialized `tokenizer.json`
    Json(PathBuf),
    /// WordPiece vocabulary file
    Vocab(PathBuf),
}

/// Serialized weights found in a model directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeightsSource {
    /// `model.safetensors`, memory-mapped
    SafeTensors(PathBuf),
    /// `pytorch_model.bin` pickle archive
    PyTorch(PathBuf),
}

impl WeightsSource {
    pub fn path(&self) -> &Path {
        match self {
            Self::SafeTensors(path) | Self::PyTorch(path) => path,
        }
    }
}

/// Validated set of files in a model directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelAssets {
    pub dir: PathBuf,
    pub config: PathBuf,
    pub weights: WeightsSource,
    pub tokenizer: TokenizerSource,
}

impl ModelAssets {
    /// Check a model directory for config, weights and tokenizer files
    pub fn locate(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(Error::model_load(dir, "model directory does not exist"));
        }

        let mut missing = Vec::new();

        let config = dir.join(CONFIG_FILE);
        if !config.is_file() {
            missing.push(CONFIG_FILE.to_string());
        }

        let weights = if dir.join(SAFETENSORS_FILE).is_file() {
            Some(WeightsSource::SafeTensors(dir.join(SAFETENSORS_FILE)))
        } else if dir.join(PYTORCH_FILE).is_file() {
            Some(WeightsSource::PyTorch(dir.join(PYTORCH_FILE)))
        } else {
            missing.push(format!("{} or {}", SAFETENSORS_FILE, PYTORCH_FILE));
            None
        };

        let tokenizer = if dir.join("tokenizer.json").is_file() {
            Some(TokenizerSource::Json(dir.join("tokenizer.json")))
        } else if dir.join("vocab.txt").is_file() {
            Some(TokenizerSource::Vocab(dir.join("vocab.txt")))
        } else {
            missing.push("tokenizer.json or vocab.txt".to_string());
            None
        };

        match (weights, tokenizer) {
            (Some(weights), Some(tokenizer)) if missing.is_empty() => Ok(Self {
                dir: dir.to_path_buf(),
                config,
                weights,
                tokenizer,
            }),
            _ => Err(Error::model_load(
                dir,
                format!("missing files: {}", missing.join(", ")),
            )),
        }
    }
}

/// Fields of a HuggingFace `config.json` the runtime needs
#[derive(Debug, Clone, Deserialize)]
pub struct ModelManifest {
    #[serde(default = "default_model_type")]
    pub model_type: String,

    #[serde(default)]
    pub id2label: BTreeMap<String, String>,

    #[serde(default)]
    pub num_labels: Option<usize>,

    #[serde(default = "default_max_positions")]
    pub max_position_embeddings: usize,

    #[serde(default)]
    pub pad_token_id: Option<u32>,
}

impl ModelManifest {
    /// Parse from a `config.json` file
    pub fn from_file(path: &Path) -> Result<Self> {
        let dir = path.parent().unwrap_or(path);
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::model_load(dir, format!("cannot read {}: {}", CONFIG_FILE, e)))?;
        Self::from_json(&content).map_err(|e| match e {
            Error::Config(reason) => Error::model_load(dir, reason),
            other => other,
        })
    }

    /// Parse from JSON text
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::config(format!("invalid {}: {}", CONFIG_FILE, e)))
    }

    /// Number of output logits
    pub fn num_labels(&self) -> usize {
        self.num_labels
            .or_else(|| (!self.id2label.is_empty()).then(|| self.id2label.len()))
            .unwrap_or(2)
    }

    /// Whether the architecture is RoBERTa-like (position ids offset by padding)
    pub fn is_roberta(&self) -> bool {
        matches!(
            self.model_type.as_str(),
            "roberta" | "xlm-roberta" | "camembert"
        )
    }

    /// Longest input the model accepts, special tokens included
    pub fn max_sequence_length(&self) -> usize {
        let positions = if self.is_roberta() {
            self.max_position_embeddings.saturating_sub(2)
        } else {
            self.max_position_embeddings
        };
        positions.max(2)
    }

    /// Index of the logit for the machine-generated class
    pub fn ai_label_index(&self) -> usize {
        let mut labels: Vec<(usize, &str)> = self
            .id2label
            .iter()
            .filter_map(|(id, label)| id.parse().ok().map(|id| (id, label.as_str())))
            .collect();
        labels.sort_by_key(|(id, _)| *id);

        labels
            .into_iter()
            .find(|(_, label)| is_ai_label(label))
            .map(|(id, _)| id)
            .unwrap_or(if self.num_labels() > 1 { 1 } else { 0 })
    }
}

fn is_ai_label(label: &str) -> bool {
    let lower = label.to_lowercase();
    if lower == "1" || lower == "label_1" {
        return true;
    }
    lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| AI_LABEL_KEYWORDS.contains(&word))
}

fn default_model_type() -> String {
    "bert".to_string()
}

fn default_max_positions() -> usize {
    512
}

/// Resolve the model directory: the configured path, else the first
/// existing `AIGC_Model` next to the executable, in the working directory,
/// or in the user cache directory.
pub fn resolve_model_dir(configured: Option<&Path>) -> PathBuf {
    if let Some(dir) = configured {
        return dir.to_path_buf();
    }

    let candidates = model_dir_candidates();
    for candidate in &candidates {
        if candidate.is_dir() {
            debug!("Using model directory {}", candidate.display());
            return candidate.clone();
        }
    }

    candidates
        .into_iter()
        .next()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_DIR_NAME))
}

fn model_dir_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
    {
        candidates.push(exe_dir.join(DEFAULT_MODEL_DIR_NAME));
    }
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join(DEFAULT_MODEL_DIR_NAME));
    }
    if let Some(cache) = dirs::cache_dir() {
        candidates.push(cache.join("aigc-sentinel").join(DEFAULT_MODEL_DIR_NAME));
    }
    candidates
}

/// Load the tokenizer described by the assets
pub fn load_tokenizer(assets: &ModelAssets) -> Result<Tokenizer> {
    match &assets.tokenizer {
        TokenizerSource::Json(path) => {
            debug!("Loading tokenizer from tokenizer.json");
            Tokenizer::from_file(path).map_err(|e| {
                Error::model_load(&assets.dir, format!("failed to load tokenizer.json: {}", e))
            })
        }
        TokenizerSource::Vocab(path) => {
            debug!("Building tokenizer from vocab.txt");

            use tokenizers::models::wordpiece::WordPiece;
            use tokenizers::normalizers::BertNormalizer;
            use tokenizers::pre_tokenizers::bert::BertPreTokenizer;
            use tokenizers::processors::bert::BertProcessing;
            use tokenizers::Model;

            let wordpiece = WordPiece::from_file(path.to_string_lossy().as_ref())
                .unk_token("[UNK]".to_string())
                .build()
                .map_err(|e| {
                    Error::model_load(
                        &assets.dir,
                        format!("failed to build WordPiece model: {}", e),
                    )
                })?;

            let cls_id = wordpiece.token_to_id("[CLS]").unwrap_or(101);
            let sep_id = wordpiece.token_to_id("[SEP]").unwrap_or(102);

            let mut tokenizer = Tokenizer::new(wordpiece);
            tokenizer.with_normalizer(Some(BertNormalizer::default()));
            tokenizer.with_pre_tokenizer(Some(BertPreTokenizer));
            tokenizer.with_post_processor(Some(BertProcessing::new(
                ("[SEP]".to_string(), sep_id),
                ("[CLS]".to_string(), cls_id),
            )));

            Ok(tokenizer)
        }
    }
}

/// [`Tokenize`] over a HuggingFace tokenizer
#[derive(Clone)]
pub struct HfTokenizer {
    inner: Tokenizer,
}

impl HfTokenizer {
    /// Wrap a tokenizer; truncation and padding are disabled on the copy
    pub fn new(mut inner: Tokenizer) -> Self {
        inner.with_padding(None);
        // Disabling truncation cannot fail validation.
        let _ = inner.with_truncation(None);
        Self { inner }
    }
}

impl Tokenize for HfTokenizer {
    fn token_spans(&self, text: &str) -> Result<Vec<Range<usize>>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| Error::inference(format!("tokenization failed: {}", e)))?;

        Ok(normalize_spans(text, encoding.get_offsets()))
    }
}

/// Snap offsets to char boundaries, drop zero-width tokens and sort by start.
///
/// Several tokens may share a span when a single character is split into
/// multiple byte-level tokens.
fn normalize_spans(text: &str, offsets: &[(usize, usize)]) -> Vec<Range<usize>> {
    let mut spans: Vec<Range<usize>> = offsets
        .iter()
        .filter_map(|&(start, end)| {
            let mut start = start.min(text.len());
            let mut end = end.min(text.len());
            while !text.is_char_boundary(start) {
                start -= 1;
            }
            while !text.is_char_boundary(end) {
                end += 1;
            }
            (end > start).then_some(start..end)
        })
        .collect();
    spans.sort_by_key(|span| span.start);
    spans
}
