//! Document ingestion
//!
//! Reads plain text, Word and PDF files into an ordered list of normalized
//! paragraphs. Loading only reads the file; nothing else is touched.

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8};
use sentinel_core::{Document, DocumentFormat, Error, Result, ScoringConfig};
use std::path::Path;
use tracing::{debug, info};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const PDF_MAGIC: &[u8] = b"%PDF";

/// Loads documents from disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentLoader {
    single_newline_breaks: bool,
}

impl Default for DocumentLoader {
    fn default() -> Self {
        Self {
            single_newline_breaks: true,
        }
    }
}

impl DocumentLoader {
    /// Create a loader with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a loader from scoring configuration
    pub fn from_config(config: &ScoringConfig) -> Self {
        Self {
            single_newline_breaks: config.single_newline_breaks,
        }
    }

    /// End a plain-text paragraph at every line break instead of blank lines only
    pub fn with_single_newline_breaks(mut self, enabled: bool) -> Self {
        self.single_newline_breaks = enabled;
        self
    }

    /// Load and normalize a document. Blocking.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<Document> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let format = detect_format(path, &bytes)?;
        debug!("Loading {} as {}", path.display(), format);

        let paragraphs = match format {
            DocumentFormat::Text => {
                let text = decode_text(path, &bytes)?;
                self.split_text(&text)
            }
            DocumentFormat::Docx => docx_paragraphs(path, &bytes)?,
            DocumentFormat::Pdf => {
                let text = pdf_extract::extract_text_from_mem(&bytes)
                    .map_err(|e| Error::corrupt_file(path, format!("cannot parse pdf: {}", e)))?;
                split_blocks(&text.replace('\u{c}', "\n\n"))
            }
        };

        let document = finish(path, format, paragraphs)?;
        info!(
            "Loaded {} paragraphs from {}",
            document.len(),
            path.display()
        );
        Ok(document)
    }

    /// Split already-decoded plain text into normalized paragraphs
    pub fn split_text(&self, text: &str) -> Vec<String> {
        if self.single_newline_breaks {
            unify_newlines(text).split('\n').map(normalize).collect()
        } else {
            split_blocks(text)
        }
    }
}

/// Choose a format by extension, falling back to content sniffing
pub fn detect_format(path: &Path, bytes: &[u8]) -> Result<DocumentFormat> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("txt" | "md" | "text" | "markdown") => Ok(DocumentFormat::Text),
        Some("docx") => Ok(DocumentFormat::Docx),
        Some("pdf") => Ok(DocumentFormat::Pdf),
        other => {
            if bytes.starts_with(ZIP_MAGIC) {
                Ok(DocumentFormat::Docx)
            } else if bytes.starts_with(PDF_MAGIC) {
                Ok(DocumentFormat::Pdf)
            } else {
                Err(Error::unsupported_format(
                    path,
                    other.unwrap_or("no extension"),
                ))
            }
        }
    }
}

/// Decode plain text: a byte-order mark wins, then UTF-8, then the legacy
/// encoding the detector considers most likely (GBK, Big5, Shift_JIS, ...)
fn decode_text(path: &Path, bytes: &[u8]) -> Result<String> {
    let (encoding, body) = match Encoding::for_bom(bytes) {
        Some((encoding, bom_len)) => (encoding, &bytes[bom_len..]),
        None if std::str::from_utf8(bytes).is_ok() => (UTF_8, bytes),
        None => {
            let mut detector = EncodingDetector::new();
            detector.feed(bytes, true);
            (detector.guess(None, true), bytes)
        }
    };
    if encoding != UTF_8 {
        debug!("Decoding {} as {}", path.display(), encoding.name());
    }

    encoding
        .decode_without_bom_handling_and_without_replacement(body)
        .map(|text| text.into_owned())
        .ok_or_else(|| Error::corrupt_file(path, format!("invalid {} text", encoding.name())))
}

fn docx_paragraphs(path: &Path, bytes: &[u8]) -> Result<Vec<String>> {
    use docx_rs::DocumentChild;

    let docx = docx_rs::read_docx(bytes)
        .map_err(|e| Error::corrupt_file(path, format!("cannot parse docx: {}", e)))?;

    Ok(docx
        .document
        .children
        .iter()
        .filter_map(|child| match child {
            DocumentChild::Paragraph(para) => Some(normalize(&paragraph_text(para))),
            _ => None,
        })
        .collect())
}

fn paragraph_text(para: &docx_rs::Paragraph) -> String {
    let mut text = String::new();
    collect_runs(&para.children, &mut text);
    text
}

fn collect_runs(children: &[docx_rs::ParagraphChild], out: &mut String) {
    use docx_rs::{ParagraphChild, RunChild};

    for child in children {
        match child {
            ParagraphChild::Run(run) => {
                for rc in &run.children {
                    match rc {
                        RunChild::Text(t) => out.push_str(&unescape_xml(&t.text)),
                        RunChild::Tab(_) => out.push('\t'),
                        RunChild::Break(_) => out.push('\n'),
                        _ => {}
                    }
                }
            }
            ParagraphChild::Hyperlink(link) => collect_runs(&link.children, out),
            _ => {}
        }
    }
}

/// Run text comes back entity-escaped from the reader
fn unescape_xml(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn unify_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Split on blank lines, collapsing line wraps inside each block
fn split_blocks(text: &str) -> Vec<String> {
    let text = unify_newlines(text);
    let mut paragraphs = Vec::new();
    let mut block: Vec<&str> = Vec::new();

    for line in text.split('\n') {
        if line.trim().is_empty() {
            if !block.is_empty() {
                paragraphs.push(normalize(&block.join("\n")));
                block.clear();
            }
        } else {
            block.push(line);
        }
    }
    if !block.is_empty() {
        paragraphs.push(normalize(&block.join("\n")));
    }
    paragraphs
}

/// Strip control characters, collapse line wraps and trim
fn normalize(raw: &str) -> String {
    let cleaned: String = unify_newlines(raw)
        .chars()
        .filter(|c| !c.is_control() || *c == '\t' || *c == '\n')
        .collect();

    cleaned
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn finish(path: &Path, format: DocumentFormat, mut paragraphs: Vec<String>) -> Result<Document> {
    let end = paragraphs
        .iter()
        .rposition(|p| !p.is_empty())
        .ok_or_else(|| Error::empty_document(path))?;
    paragraphs.truncate(end + 1);

    let start = paragraphs.iter().position(|p| !p.is_empty()).unwrap_or(0);

    Ok(Document::new(format, paragraphs.into_iter().skip(start)).with_source(path))
}
