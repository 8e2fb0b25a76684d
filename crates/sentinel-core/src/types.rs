//! Core types for AIGC Sentinel

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Source format a document was extracted from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    /// Plain UTF-8 text (txt, md)
    Text,
    /// Office Open XML word processing document
    Docx,
    /// Portable Document Format
    Pdf,
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Docx => write!(f, "docx"),
            Self::Pdf => write!(f, "pdf"),
        }
    }
}

/// A single paragraph of a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paragraph {
    /// Position in the document (order-significant)
    pub index: usize,

    /// Normalized paragraph text
    pub text: String,
}

impl Paragraph {
    /// Create a new paragraph
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
        }
    }

    /// Whitespace-only paragraphs are kept for alignment but never scored
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// An immutable, ordered sequence of paragraphs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    source: Option<PathBuf>,
    format: DocumentFormat,
    paragraphs: Vec<Paragraph>,
}

impl Document {
    /// Create a document from paragraph texts; indices follow input order
    pub fn new<I, S>(format: DocumentFormat, paragraphs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let paragraphs = paragraphs
            .into_iter()
            .enumerate()
            .map(|(index, text)| Paragraph::new(index, text))
            .collect();

        Self {
            source: None,
            format,
            paragraphs,
        }
    }

    /// Convenience constructor for in-memory plain text
    pub fn from_paragraphs<I, S>(paragraphs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(DocumentFormat::Text, paragraphs)
    }

    /// Record the file the document was loaded from
    pub fn with_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = Some(path.into());
        self
    }

    /// File the document was loaded from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Source format
    pub fn format(&self) -> DocumentFormat {
        self.format
    }

    /// All paragraphs, including empty ones
    pub fn paragraphs(&self) -> &[Paragraph] {
        &self.paragraphs
    }

    /// Number of paragraphs, including empty ones
    pub fn len(&self) -> usize {
        self.paragraphs.len()
    }

    /// Whether the document has no paragraphs at all
    pub fn is_empty(&self) -> bool {
        self.paragraphs.is_empty()
    }

    /// Whether any paragraph carries scorable text
    pub fn has_text(&self) -> bool {
        self.paragraphs.iter().any(|p| !p.is_empty())
    }
}

/// Where a window sits within its paragraph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowPosition {
    /// The paragraph fits in a single window
    Single,
    First,
    Middle,
    Last,
}

impl WindowPosition {
    /// Position of window `idx` among `count` windows
    pub fn of(idx: usize, count: usize) -> Self {
        match (idx, count) {
            (_, 0 | 1) => Self::Single,
            (0, _) => Self::First,
            (i, n) if i + 1 == n => Self::Last,
            _ => Self::Middle,
        }
    }
}

/// A token-bounded sub-span of a paragraph fed to the classifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    /// Index of the parent paragraph
    pub paragraph_index: usize,

    /// Position marker used for aggregation
    pub position: WindowPosition,

    /// Token indices covered, relative to the paragraph
    pub token_range: Range<usize>,

    /// Byte range of the paragraph text covered by this window
    pub span: Range<usize>,

    /// Byte offset within `span` where the non-overlapping part begins
    pub fresh_offset: usize,

    /// Tokens not shared with the previous window (aggregation weight)
    pub fresh_tokens: usize,

    /// Window text, `paragraph.text[span]`
    pub text: String,
}

impl Window {
    /// Number of tokens fed to the model
    pub fn token_count(&self) -> usize {
        self.token_range.len()
    }

    /// Text not already covered by the previous window
    pub fn fresh_text(&self) -> &str {
        &self.text[self.fresh_offset..]
    }
}

/// Score for one non-empty paragraph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    /// Index of the paragraph in the source document
    pub paragraph_index: usize,

    /// AI-probability in [0, 1]
    pub probability: f32,

    /// Weighted variance of window probabilities, when several windows contributed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variance: Option<f32>,

    /// Number of windows scored for this paragraph
    pub window_count: usize,

    /// Tokenized length of the paragraph
    pub token_count: usize,

    /// Too short to weigh in the document aggregate
    #[serde(default)]
    pub below_min_length: bool,
}

/// Accelerator family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accelerator {
    Cuda,
    Metal,
}

impl fmt::Display for Accelerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cuda => write!(f, "cuda"),
            Self::Metal => write!(f, "metal"),
        }
    }
}

/// Device a run executed on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ExecutionDevice {
    Gpu {
        accelerator: Accelerator,
        ordinal: usize,
    },
    Cpu {
        /// Why an accelerator was not used, when one was wanted
        #[serde(skip_serializing_if = "Option::is_none")]
        fallback_reason: Option<String>,
    },
}

impl ExecutionDevice {
    /// CPU chosen on purpose
    pub fn cpu() -> Self {
        Self::Cpu {
            fallback_reason: None,
        }
    }

    /// CPU chosen because the preferred accelerator was unusable
    pub fn cpu_fallback(reason: impl Into<String>) -> Self {
        Self::Cpu {
            fallback_reason: Some(reason.into()),
        }
    }

    /// Whether inference ran in degraded mode
    pub fn is_degraded(&self) -> bool {
        matches!(
            self,
            Self::Cpu {
                fallback_reason: Some(_)
            }
        )
    }
}

impl fmt::Display for ExecutionDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gpu {
                accelerator,
                ordinal,
            } => write!(f, "{}:{}", accelerator, ordinal),
            Self::Cpu {
                fallback_reason: None,
            } => write!(f, "cpu"),
            Self::Cpu {
                fallback_reason: Some(reason),
            } => write!(f, "cpu (degraded: {})", reason),
        }
    }
}

/// Final output of one scoring run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// One record per non-empty paragraph, in document order
    pub records: Vec<ScoreRecord>,

    /// Total paragraphs in the document, including empty ones
    pub paragraph_count: usize,

    /// Token-weighted document-level AI-probability
    pub probability: f32,

    /// Device the run executed on
    pub device: ExecutionDevice,

    /// Whether the run fell back from an accelerator
    pub degraded: bool,

    /// Windows scored
    pub window_count: usize,

    /// Inference batches executed
    pub batch_count: usize,

    /// Wall-clock time of the run in milliseconds
    pub elapsed_ms: u64,
}

impl Report {
    /// Score for a paragraph; `None` for empty paragraphs
    pub fn record(&self, paragraph_index: usize) -> Option<&ScoreRecord> {
        self.records
            .binary_search_by_key(&paragraph_index, |r| r.paragraph_index)
            .ok()
            .map(|idx| &self.records[idx])
    }

    /// Paragraph-aligned view: one entry per document paragraph
    pub fn aligned(&self) -> Vec<Option<&ScoreRecord>> {
        (0..self.paragraph_count).map(|idx| self.record(idx)).collect()
    }

    /// Document probability as a percentage rounded to two decimals
    pub fn percentage(&self) -> f32 {
        (self.probability * 10_000.0).round() / 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(idx: usize, p: f32) -> ScoreRecord {
        ScoreRecord {
            paragraph_index: idx,
            probability: p,
            variance: None,
            window_count: 1,
            token_count: 10,
            below_min_length: false,
        }
    }

    #[test]
    fn test_document_indices_follow_order() {
        let doc = Document::from_paragraphs(["one", "   ", "three"]);
        assert_eq!(doc.len(), 3);
        assert_eq!(doc.paragraphs()[2].index, 2);
        assert!(doc.paragraphs()[1].is_empty());
        assert!(doc.has_text());
    }

    #[test]
    fn test_window_position() {
        assert_eq!(WindowPosition::of(0, 1), WindowPosition::Single);
        assert_eq!(WindowPosition::of(0, 3), WindowPosition::First);
        assert_eq!(WindowPosition::of(1, 3), WindowPosition::Middle);
        assert_eq!(WindowPosition::of(2, 3), WindowPosition::Last);
    }

    #[test]
    fn test_report_alignment_skips_empty() {
        let report = Report {
            records: vec![record(0, 0.2), record(2, 0.8)],
            paragraph_count: 3,
            probability: 0.5,
            device: ExecutionDevice::cpu(),
            degraded: false,
            window_count: 2,
            batch_count: 1,
            elapsed_ms: 0,
        };

        let aligned = report.aligned();
        assert_eq!(aligned.len(), 3);
        assert!(aligned[1].is_none());
        assert_eq!(report.record(2).map(|r| r.probability), Some(0.8));
        assert_eq!(report.percentage(), 50.0);
    }

    #[test]
    fn test_degraded_device() {
        assert!(!ExecutionDevice::cpu().is_degraded());
        assert!(ExecutionDevice::cpu_fallback("no gpu").is_degraded());

        let gpu = ExecutionDevice::Gpu {
            accelerator: Accelerator::Cuda,
            ordinal: 0,
        };
        assert!(!gpu.is_degraded());
        assert_eq!(gpu.to_string(), "cuda:0");
    }

    #[test]
    fn test_device_serializes_tagged() {
        let json = serde_json::to_value(ExecutionDevice::cpu_fallback("low memory")).unwrap();
        assert_eq!(json["kind"], "cpu");
        assert_eq!(json["fallback_reason"], "low memory");
    }
}
