//! AIGC Sentinel Engine
//!
//! Turns a document into a per-paragraph AI-likelihood [`Report`]:
//!
//! ```text
//! DocumentLoader -> Segmenter -> ScoringEngine (batches through ModelRuntime)
//!                                      |
//!                               TaskScheduler -> TaskHandle
//! ```
//!
//! [`Report`]: sentinel_core::Report

pub mod aggregate;
pub mod engine;
pub mod loader;
pub mod scheduler;
pub mod segmenter;

pub use engine::{Progress, RunControl, ScoringEngine};
pub use loader::DocumentLoader;
pub use scheduler::{TaskHandle, TaskScheduler, TaskStatus};
pub use segmenter::{segment, Segmentation, Segmenter};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::engine::{RunControl, ScoringEngine};
    pub use crate::loader::DocumentLoader;
    pub use crate::scheduler::{TaskHandle, TaskScheduler, TaskStatus};
}
