//! Report rendering for the terminal and JSON consumers

use sentinel_core::Report;
use sentinel_engine::TaskStatus;
use serde::Serialize;
use std::fmt::Write;
use std::path::{Path, PathBuf};

/// Final result for one input file
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub file: PathBuf,
    pub status: &'static str,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<Report>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Outcome {
    /// Capture a terminal task status
    pub fn new(file: &Path, status: &TaskStatus) -> Self {
        let (report, error) = match status {
            TaskStatus::Done(report) => (Some(report.as_ref().clone()), None),
            TaskStatus::Failed(error) => (None, Some(error.to_string())),
            _ => (None, None),
        };
        Self {
            file: file.to_path_buf(),
            status: status.label(),
            report,
            error,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.report.is_some()
    }
}

/// Pretty JSON array of outcomes
pub fn render_json(outcomes: &[Outcome]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(outcomes)
}

/// Human-readable summary with one line per paragraph
pub fn render_text(outcomes: &[Outcome]) -> String {
    let mut out = String::new();
    for outcome in outcomes {
        // Writing to a String cannot fail.
        let _ = write_outcome(&mut out, outcome);
    }
    out
}

fn write_outcome(out: &mut String, outcome: &Outcome) -> std::fmt::Result {
    writeln!(out, "{}", outcome.file.display())?;

    let Some(report) = &outcome.report else {
        match &outcome.error {
            Some(error) => writeln!(out, "  failed: {}", error)?,
            None => writeln!(out, "  {}", outcome.status)?,
        }
        return writeln!(out);
    };

    writeln!(out, "  document: {:.2}% AI-generated", report.percentage())?;
    writeln!(out, "  device:   {}", report.device)?;
    writeln!(
        out,
        "  windows:  {} in {} batches, {} ms",
        report.window_count, report.batch_count, report.elapsed_ms
    )?;

    for (index, record) in report.aligned().into_iter().enumerate() {
        match record {
            Some(record) => {
                write!(out, "  #{:<4} {:>6.2}%", index, record.probability * 100.0)?;
                let mut notes = Vec::new();
                if record.window_count > 1 {
                    notes.push(format!("{} windows", record.window_count));
                }
                if record.below_min_length {
                    notes.push("below minimum length".to_string());
                }
                if notes.is_empty() {
                    writeln!(out)?;
                } else {
                    writeln!(out, "  ({})", notes.join(", "))?;
                }
            }
            None => writeln!(out, "  #{:<4}      -", index)?,
        }
    }
    writeln!(out)
}
