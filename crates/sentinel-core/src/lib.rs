//! AIGC Sentinel Core
//!
//! Core types, configuration, and error handling shared across the
//! Sentinel scoring pipeline.
//!
//! This crate provides:
//! - Document, window, score and report types
//! - The error taxonomy surfaced to callers
//! - Scoring configuration loaded from YAML
//! - The tokenizer seam the segmenter depends on

pub mod config;
pub mod error;
pub mod tokenize;
pub mod types;

pub use config::{DevicePreference, ScoringConfig};
pub use error::{Error, Result};
pub use tokenize::Tokenize;
pub use types::{
    Accelerator, Document, DocumentFormat, ExecutionDevice, Paragraph, Report, ScoreRecord,
    Window, WindowPosition,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::ScoringConfig;
    pub use crate::error::{Error, Result};
    pub use crate::tokenize::Tokenize;
    pub use crate::types::{Document, ExecutionDevice, Report, ScoreRecord, Window};
}
