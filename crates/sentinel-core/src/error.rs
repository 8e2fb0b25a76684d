//! Error types for AIGC Sentinel

use std::path::{Path, PathBuf};

/// Result type alias using Sentinel's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for scoring runs
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The file extension or content is not a recognised document format
    #[error("unsupported format for {}: {format}", path.display())]
    UnsupportedFormat { path: PathBuf, format: String },

    /// The document container could not be parsed
    #[error("corrupt file {}: {reason}", path.display())]
    CorruptFile { path: PathBuf, reason: String },

    /// No extractable text remained after normalization
    #[error("document contains no extractable text: {}", path.display())]
    EmptyDocument { path: PathBuf },

    /// Model weights or tokenizer could not be located or loaded
    #[error("failed to load model from {}: {reason}", dir.display())]
    ModelLoad { dir: PathBuf, reason: String },

    /// A forward pass failed on the device
    #[error("inference error: {0}")]
    Inference(String),

    /// The run was cancelled by the caller or by its time budget
    #[error("run cancelled")]
    Cancelled,

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new unsupported-format error
    pub fn unsupported_format(path: impl AsRef<Path>, format: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            path: path.as_ref().to_path_buf(),
            format: format.into(),
        }
    }

    /// Create a new corrupt-file error
    pub fn corrupt_file(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::CorruptFile {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Create a new empty-document error
    pub fn empty_document(path: impl AsRef<Path>) -> Self {
        Self::EmptyDocument {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Create a new model-load error naming the expected directory
    pub fn model_load(dir: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::ModelLoad {
            dir: dir.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Create a new inference error
    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether a smaller batch may succeed where this one failed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Inference(_))
    }

    /// Short machine-readable tag for logs and metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnsupportedFormat { .. } => "unsupported_format",
            Self::CorruptFile { .. } => "corrupt_file",
            Self::EmptyDocument { .. } => "empty_document",
            Self::ModelLoad { .. } => "model_load",
            Self::Inference(_) => "inference",
            Self::Cancelled => "cancelled",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Internal(_) => "internal",
        }
    }
}
