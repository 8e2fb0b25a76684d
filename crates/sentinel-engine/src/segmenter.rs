//! Token-window segmentation
//!
//! Paragraphs longer than the model's context are cut into overlapping
//! windows of at most `max_tokens` tokens. Window byte spans tile the
//! paragraph: the first starts at byte 0, the last ends at the paragraph's
//! end, and each window's non-overlapping part starts exactly where the
//! previous window ended.

use sentinel_core::{Document, Paragraph, Result, Tokenize, Window, WindowPosition};
use std::ops::Range;

/// Windows for one paragraph, as a range into [`Segmentation::windows`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParagraphSegments {
    pub paragraph_index: usize,
    pub token_count: usize,
    pub windows: Range<usize>,
}

/// All windows of a document, grouped by paragraph in document order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Segmentation {
    windows: Vec<Window>,
    paragraphs: Vec<ParagraphSegments>,
}

impl Segmentation {
    /// Windows in document order
    pub fn windows(&self) -> &[Window] {
        &self.windows
    }

    /// Paragraphs that produced at least one window
    pub fn paragraphs(&self) -> &[ParagraphSegments] {
        &self.paragraphs
    }

    /// Windows of one paragraph
    pub fn windows_for(&self, paragraph_index: usize) -> &[Window] {
        self.paragraphs
            .iter()
            .find(|p| p.paragraph_index == paragraph_index)
            .map(|p| &self.windows[p.windows.clone()])
            .unwrap_or(&[])
    }

    /// Total window count
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

/// Cuts paragraphs into token windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segmenter {
    max_tokens: usize,
    overlap_tokens: usize,
}

impl Segmenter {
    /// Create a segmenter; `overlap` is the fraction of `max_tokens` shared
    /// by adjacent windows
    pub fn new(max_tokens: usize, overlap: f32) -> Self {
        let max_tokens = max_tokens.max(1);
        let overlap = if overlap.is_finite() { overlap.max(0.0) } else { 0.0 };
        let overlap_tokens = ((max_tokens as f32 * overlap).floor() as usize).min(max_tokens - 1);
        Self {
            max_tokens,
            overlap_tokens,
        }
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn overlap_tokens(&self) -> usize {
        self.overlap_tokens
    }

    /// Segment every non-empty paragraph of a document
    pub fn segment(&self, document: &Document, tokenizer: &dyn Tokenize) -> Result<Segmentation> {
        let mut segmentation = Segmentation::default();

        for paragraph in document.paragraphs() {
            if paragraph.is_empty() {
                continue;
            }
            let spans = tokenizer.token_spans(&paragraph.text)?;
            if spans.is_empty() {
                continue;
            }

            let start = segmentation.windows.len();
            segmentation
                .windows
                .extend(self.windows_from_spans(paragraph, &spans));
            segmentation.paragraphs.push(ParagraphSegments {
                paragraph_index: paragraph.index,
                token_count: spans.len(),
                windows: start..segmentation.windows.len(),
            });
        }

        Ok(segmentation)
    }

    /// Windows for a single paragraph; empty for whitespace-only text
    pub fn segment_paragraph(
        &self,
        paragraph: &Paragraph,
        tokenizer: &dyn Tokenize,
    ) -> Result<Vec<Window>> {
        if paragraph.is_empty() {
            return Ok(Vec::new());
        }
        let spans = tokenizer.token_spans(&paragraph.text)?;
        Ok(self.windows_from_spans(paragraph, &spans))
    }

    fn token_ranges(&self, total: usize) -> Vec<Range<usize>> {
        if total == 0 {
            return Vec::new();
        }
        let stride = self.max_tokens - self.overlap_tokens;
        let mut ranges = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + self.max_tokens).min(total);
            ranges.push(start..end);
            if end == total {
                return ranges;
            }
            start += stride;
        }
    }

    fn windows_from_spans(&self, paragraph: &Paragraph, spans: &[Range<usize>]) -> Vec<Window> {
        let text = paragraph.text.as_str();
        let ranges = self.token_ranges(spans.len());
        let count = ranges.len();

        let mut windows = Vec::with_capacity(count);
        let mut prev_end = 0;
        let mut prev_tokens = 0;

        for (idx, tokens) in ranges.into_iter().enumerate() {
            let byte_start = if idx == 0 { 0 } else { spans[tokens.start].start };
            let byte_end = if idx + 1 == count {
                text.len()
            } else {
                spans[tokens.end].start
            };

            windows.push(Window {
                paragraph_index: paragraph.index,
                position: WindowPosition::of(idx, count),
                fresh_offset: prev_end - byte_start,
                fresh_tokens: tokens.end - prev_tokens,
                text: text[byte_start..byte_end].to_string(),
                span: byte_start..byte_end,
                token_range: tokens.clone(),
            });

            prev_end = byte_end;
            prev_tokens = tokens.end;
        }

        windows
    }
}

/// Segment a document with a one-off segmenter
pub fn segment(
    document: &Document,
    tokenizer: &dyn Tokenize,
    max_tokens: usize,
    overlap: f32,
) -> Result<Segmentation> {
    Segmenter::new(max_tokens, overlap).segment(document, tokenizer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// One token per whitespace-separated word
    struct Words;

    impl Tokenize for Words {
        fn token_spans(&self, text: &str) -> Result<Vec<Range<usize>>> {
            let mut spans = Vec::new();
            let mut start = None;
            for (idx, ch) in text.char_indices() {
                match (ch.is_whitespace(), start) {
                    (false, None) => start = Some(idx),
                    (true, Some(s)) => {
                        spans.push(s..idx);
                        start = None;
                    }
                    _ => {}
                }
            }
            if let Some(s) = start {
                spans.push(s..text.len());
            }
            Ok(spans)
        }
    }

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ")
    }

    fn reconstruct(windows: &[Window]) -> String {
        windows.iter().map(Window::fresh_text).collect()
    }

    #[test]
    fn test_short_paragraph_is_single_window() {
        let paragraph = Paragraph::new(3, "a short paragraph");
        let windows = Segmenter::new(8, 0.25)
            .segment_paragraph(&paragraph, &Words)
            .unwrap();

        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].position, WindowPosition::Single);
        assert_eq!(windows[0].paragraph_index, 3);
        assert_eq!(windows[0].text, "a short paragraph");
        assert_eq!(windows[0].fresh_tokens, 3);
    }

    #[test]
    fn test_exactly_max_tokens_is_one_window() {
        let paragraph = Paragraph::new(0, words(8));
        let windows = Segmenter::new(8, 0.25)
            .segment_paragraph(&paragraph, &Words)
            .unwrap();
        assert_eq!(windows.len(), 1);
    }

    #[test]
    fn test_long_paragraph_overlaps() {
        let paragraph = Paragraph::new(0, words(20));
        let segmenter = Segmenter::new(8, 0.25);
        assert_eq!(segmenter.overlap_tokens(), 2);

        let windows = segmenter.segment_paragraph(&paragraph, &Words).unwrap();
        let ranges: Vec<_> = windows.iter().map(|w| w.token_range.clone()).collect();
        assert_eq!(ranges, vec![0..8, 6..14, 12..20]);

        let positions: Vec<_> = windows.iter().map(|w| w.position).collect();
        assert_eq!(
            positions,
            vec![WindowPosition::First, WindowPosition::Middle, WindowPosition::Last]
        );

        let weights: Vec<_> = windows.iter().map(|w| w.fresh_tokens).collect();
        assert_eq!(weights, vec![8, 6, 6]);

        assert!(windows[1].text.starts_with("w6 "));
        assert!(windows[1].fresh_text().starts_with("w8 "));
        assert_eq!(reconstruct(&windows), paragraph.text);
    }

    #[test]
    fn test_zero_overlap_tiles_exactly() {
        let paragraph = Paragraph::new(0, words(10));
        let windows = Segmenter::new(4, 0.0)
            .segment_paragraph(&paragraph, &Words)
            .unwrap();

        assert_eq!(windows.len(), 3);
        assert!(windows.iter().all(|w| w.fresh_offset == 0));
        assert_eq!(reconstruct(&windows), paragraph.text);
    }

    #[test]
    fn test_empty_paragraphs_have_no_windows() {
        let document = Document::from_paragraphs(["first one", "   ", "", "second"]);
        let segmentation = segment(&document, &Words, 510, 0.125).unwrap();

        let indices: Vec<_> = segmentation
            .paragraphs()
            .iter()
            .map(|p| p.paragraph_index)
            .collect();
        assert_eq!(indices, vec![0, 3]);
        assert_eq!(segmentation.len(), 2);
        assert!(segmentation.windows_for(1).is_empty());
        assert_eq!(segmentation.windows_for(3)[0].text, "second");
    }

    #[test]
    fn test_overlap_is_clamped_below_max() {
        let segmenter = Segmenter::new(4, 0.99);
        assert_eq!(segmenter.overlap_tokens(), 3);

        let paragraph = Paragraph::new(0, words(6));
        let windows = segmenter.segment_paragraph(&paragraph, &Words).unwrap();
        assert_eq!(windows.len(), 3);
        assert_eq!(reconstruct(&windows), paragraph.text);
    }

    /// One token per char, two tokens sharing the span of a non-ASCII char
    struct ByteLevel;

    impl Tokenize for ByteLevel {
        fn token_spans(&self, text: &str) -> Result<Vec<Range<usize>>> {
            Ok(text
                .char_indices()
                .flat_map(|(idx, ch)| {
                    let span = idx..idx + ch.len_utf8();
                    let copies = if ch.is_ascii() { 1 } else { 2 };
                    std::iter::repeat(span).take(copies)
                })
                .collect())
        }
    }

    #[test]
    fn test_repeated_spans_stay_contiguous() {
        let paragraph = Paragraph::new(0, "ab人cd工ef智");
        let windows = Segmenter::new(3, 0.0)
            .segment_paragraph(&paragraph, &ByteLevel)
            .unwrap();

        assert_eq!(windows.len(), 4);
        assert!(windows.iter().all(|w| !w.text.is_empty()));
        assert_eq!(windows.iter().map(|w| w.fresh_tokens).sum::<usize>(), 12);
        assert_eq!(reconstruct(&windows), paragraph.text);
    }

    #[test]
    fn test_deterministic() {
        let document = Document::from_paragraphs([words(50), words(3)]);
        let first = segment(&document, &Words, 16, 0.125).unwrap();
        let second = segment(&document, &Words, 16, 0.125).unwrap();
        assert_eq!(first, second);
    }

    proptest! {
        #[test]
        fn prop_windows_reconstruct_paragraph(
            text in "[a-z ]{1,300}",
            max_tokens in 1usize..24,
            overlap in 0.0f32..0.95,
        ) {
            let paragraph = Paragraph::new(0, text.clone());
            let segmenter = Segmenter::new(max_tokens, overlap);
            let windows = segmenter.segment_paragraph(&paragraph, &Words).unwrap();
            let token_count = Words.count_tokens(&text).unwrap();

            if token_count == 0 {
                prop_assert!(windows.is_empty());
            } else {
                prop_assert_eq!(reconstruct(&windows), text.clone());
                prop_assert_eq!(windows.iter().map(|w| w.fresh_tokens).sum::<usize>(), token_count);
                prop_assert!(windows.iter().all(|w| w.token_count() <= segmenter.max_tokens()));
                prop_assert!(windows.iter().all(|w| w.text == text[w.span.clone()]));
                prop_assert_eq!(windows.len() == 1, token_count <= max_tokens);
            }
        }
    }
}
