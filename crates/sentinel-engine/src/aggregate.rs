//! Paragraph and document score aggregation
//!
//! Pure functions over window probabilities. Means are accumulated in
//! `f64` and every result is clamped to [0, 1].

use crate::segmenter::Segmentation;
use sentinel_core::{Error, Result, ScoreRecord};

/// Combine `(probability, weight)` pairs for one paragraph.
///
/// A single window returns its probability unchanged with no variance.
/// Several windows return the weighted mean and weighted variance; when
/// every weight is zero the windows count equally.
pub fn combine_windows(scores: &[(f32, usize)]) -> Option<(f32, Option<f32>)> {
    match scores {
        [] => None,
        [(p, _)] => Some((p.clamp(0.0, 1.0), None)),
        _ => {
            let total: usize = scores.iter().map(|(_, w)| w).sum();
            let weight = |w: usize| if total == 0 { 1.0 } else { w as f64 };
            let norm: f64 = scores.iter().map(|&(_, w)| weight(w)).sum();

            let mean = scores
                .iter()
                .map(|&(p, w)| weight(w) * p as f64)
                .sum::<f64>()
                / norm;
            let variance = scores
                .iter()
                .map(|&(p, w)| weight(w) * (p as f64 - mean).powi(2))
                .sum::<f64>()
                / norm;

            Some((mean.clamp(0.0, 1.0) as f32, Some(variance.max(0.0) as f32)))
        }
    }
}

/// Build one record per segmented paragraph from window probabilities
/// given in window order.
pub fn build_records(
    segmentation: &Segmentation,
    probabilities: &[f32],
    min_paragraph_tokens: usize,
) -> Result<Vec<ScoreRecord>> {
    if probabilities.len() != segmentation.len() {
        return Err(Error::internal(format!(
            "{} probabilities for {} windows",
            probabilities.len(),
            segmentation.len()
        )));
    }

    let windows = segmentation.windows();
    let mut records = Vec::with_capacity(segmentation.paragraphs().len());

    for paragraph in segmentation.paragraphs() {
        let scores: Vec<(f32, usize)> = paragraph
            .windows
            .clone()
            .map(|i| (probabilities[i], windows[i].fresh_tokens))
            .collect();

        let (probability, variance) = combine_windows(&scores).ok_or_else(|| {
            Error::internal(format!(
                "paragraph {} has no windows",
                paragraph.paragraph_index
            ))
        })?;

        records.push(ScoreRecord {
            paragraph_index: paragraph.paragraph_index,
            probability,
            variance,
            window_count: scores.len(),
            token_count: paragraph.token_count,
            below_min_length: paragraph.token_count < min_paragraph_tokens,
        });
    }

    Ok(records)
}

/// Token-weighted mean of paragraph scores.
///
/// Records flagged `below_min_length` are left out unless nothing else
/// carries weight. An empty slice scores 0.
pub fn document_probability(records: &[ScoreRecord]) -> f32 {
    let weighted = |include_short: bool| -> Option<f64> {
        let (sum, total) = records
            .iter()
            .filter(|r| include_short || !r.below_min_length)
            .fold((0.0f64, 0usize), |(sum, total), r| {
                (
                    sum + r.probability as f64 * r.token_count as f64,
                    total + r.token_count,
                )
            });
        (total > 0).then(|| sum / total as f64)
    };

    weighted(false)
        .or_else(|| weighted(true))
        .map(|p| p.clamp(0.0, 1.0) as f32)
        .unwrap_or(0.0)
}
