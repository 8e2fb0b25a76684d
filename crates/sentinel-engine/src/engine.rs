//! Scoring engine
//!
//! Drives one run: acquire the runtime, segment the document, push windows
//! through the model in batches and aggregate the probabilities into a
//! [`Report`]. Device work runs on the blocking pool.

use crate::aggregate::{build_records, document_probability};
use crate::segmenter::{Segmentation, Segmenter};
use sentinel_classifiers::RuntimeHandle;
use sentinel_core::{Document, Error, Report, Result, ScoringConfig};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Progress of a running task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    /// Windows scored so far
    pub windows_done: usize,

    /// Windows in the whole document
    pub windows_total: usize,

    /// Batches executed so far
    pub batches_done: usize,
}

impl Progress {
    /// Fraction of windows scored, in [0, 1]
    pub fn fraction(&self) -> f32 {
        if self.windows_total == 0 {
            0.0
        } else {
            self.windows_done as f32 / self.windows_total as f32
        }
    }
}

type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync>;

/// Cancellation, budget and progress hooks for one run
#[derive(Clone, Default)]
pub struct RunControl {
    cancel: CancellationToken,
    time_budget: Option<Duration>,
    on_progress: Option<ProgressFn>,
}

impl RunControl {
    /// Control bound to a cancellation token
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..Default::default()
        }
    }

    /// Cancel the run if it is still going after `budget`; overrides the
    /// configured budget
    pub fn with_time_budget(mut self, budget: Option<Duration>) -> Self {
        self.time_budget = budget;
        self
    }

    /// Called after every batch
    pub fn with_progress(mut self, callback: impl Fn(Progress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    /// Token observed between batches
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn report(&self, progress: Progress) {
        if let Some(callback) = &self.on_progress {
            callback(progress);
        }
    }
}

impl std::fmt::Debug for RunControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunControl")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("time_budget", &self.time_budget)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// Scores documents against a shared model runtime
#[derive(Clone)]
pub struct ScoringEngine {
    runtime: RuntimeHandle,
    config: ScoringConfig,
}

impl ScoringEngine {
    /// Create an engine; the configuration is validated up front
    pub fn new(runtime: RuntimeHandle, config: ScoringConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { runtime, config })
    }

    pub fn runtime(&self) -> &RuntimeHandle {
        &self.runtime
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score a document with no cancellation or progress hooks
    pub async fn score(&self, document: &Document) -> Result<Report> {
        self.score_with(document, &RunControl::default()).await
    }

    /// Score a document, checking `control` between batches
    pub async fn score_with(&self, document: &Document, control: &RunControl) -> Result<Report> {
        let started = Instant::now();
        let result = self.run(document, control, started).await;

        let outcome = match &result {
            Ok(_) => "completed",
            Err(e) => e.kind(),
        };
        metrics::counter!("sentinel_runs_total", "outcome" => outcome).increment(1);
        metrics::histogram!("sentinel_run_duration_seconds").record(started.elapsed().as_secs_f64());

        result
    }

    async fn run(&self, document: &Document, control: &RunControl, started: Instant) -> Result<Report> {
        let source = document
            .source()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| "<memory>".into());
        if !document.has_text() {
            return Err(Error::empty_document(&source));
        }
        let deadline = control
            .time_budget
            .or_else(|| self.config.time_budget())
            .map(|budget| started + budget);
        check_continue(control, deadline)?;

        let runtime = Arc::clone(&self.runtime);
        let info = blocking(move || runtime.acquire()).await?;

        let segmenter = Segmenter::new(
            self.config.max_tokens.min(info.max_content_tokens),
            self.config.overlap,
        );
        let segmentation = {
            let document = document.clone();
            let tokenizer = Arc::clone(&info.tokenizer);
            blocking(move || segmenter.segment(&document, tokenizer.as_ref())).await?
        };
        if segmentation.is_empty() {
            return Err(Error::empty_document(&source));
        }

        info!(
            "Scoring {} paragraphs as {} windows on {} (max {} tokens, overlap {})",
            segmentation.paragraphs().len(),
            segmentation.len(),
            info.device,
            segmenter.max_tokens(),
            segmenter.overlap_tokens()
        );

        let (probabilities, batch_count) = self.infer_all(&segmentation, control, deadline).await?;

        let records = build_records(
            &segmentation,
            &probabilities,
            self.config.min_paragraph_tokens,
        )?;
        let probability = document_probability(&records);

        let report = Report {
            records,
            paragraph_count: document.len(),
            probability,
            degraded: info.device.is_degraded(),
            device: info.device,
            window_count: segmentation.len(),
            batch_count,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            "Document scored {:.2}% AI in {} ms ({} batches)",
            report.percentage(),
            report.elapsed_ms,
            report.batch_count
        );
        Ok(report)
    }

    async fn infer_all(
        &self,
        segmentation: &Segmentation,
        control: &RunControl,
        deadline: Option<Instant>,
    ) -> Result<(Vec<f32>, usize)> {
        let windows = segmentation.windows();
        let mut progress = Progress {
            windows_total: windows.len(),
            ..Default::default()
        };
        let mut probabilities = Vec::with_capacity(windows.len());

        control.report(progress);

        while progress.windows_done < windows.len() {
            check_continue(control, deadline)?;

            let size = self.runtime.batch_size().max(1);
            let end = (progress.windows_done + size).min(windows.len());
            let texts: Vec<String> = windows[progress.windows_done..end]
                .iter()
                .map(|w| w.text.clone())
                .collect();

            let runtime = Arc::clone(&self.runtime);
            let inference = blocking(move || runtime.infer(&texts)).await?;
            if inference.retried {
                warn!("Batch {} recovered after retry", progress.batches_done + 1);
            }

            let scored = inference.probabilities.len();
            probabilities.extend(inference.probabilities);
            progress.windows_done = end;
            progress.batches_done += 1;

            metrics::counter!("sentinel_windows_scored_total").increment(scored as u64);
            metrics::counter!("sentinel_batches_total").increment(1);
            debug!(
                "Batch {} scored {} windows ({}/{})",
                progress.batches_done, scored, progress.windows_done, progress.windows_total
            );
            control.report(progress);
        }

        Ok((probabilities, progress.batches_done))
    }
}

fn check_continue(control: &RunControl, deadline: Option<Instant>) -> Result<()> {
    if control.cancel.is_cancelled() {
        debug!("Run cancelled");
        return Err(Error::Cancelled);
    }
    if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
        warn!("Run exceeded its time budget");
        return Err(Error::Cancelled);
    }
    Ok(())
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::internal(format!("blocking task failed: {}", e)))?
}
