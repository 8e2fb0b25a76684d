//! Background task scheduler
//!
//! A single worker task owns the pipeline. Submissions queue in order and
//! run one at a time; callers get a [`TaskHandle`] they can poll, wait on or
//! cancel without blocking.

use crate::engine::{Progress, RunControl, ScoringEngine};
use crate::loader::DocumentLoader;
use parking_lot::Mutex;
use sentinel_core::{Document, Error, Report};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Observable state of a submitted task
#[derive(Debug, Clone)]
pub enum TaskStatus {
    /// Queued behind other work
    Pending,
    /// Scoring; progress is updated after every batch
    Running(Progress),
    Done(Arc<Report>),
    Failed(Arc<Error>),
    /// Cancelled by the caller or by the time budget; no partial report
    Cancelled,
}

impl TaskStatus {
    /// Whether the task has reached a final state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Failed(_) | Self::Cancelled)
    }

    /// Short lowercase label
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running(_) => "running",
            Self::Done(_) => "done",
            Self::Failed(_) => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Caller's view of a submitted task
///
/// The worker owns the only strong reference to the status sender, so a
/// handle whose job was dropped without finishing resolves to `Failed`
/// instead of waiting forever.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: u64,
    status: watch::Receiver<TaskStatus>,
    sender: Weak<watch::Sender<TaskStatus>>,
    cancel: CancellationToken,
}

impl TaskHandle {
    /// Submission-ordered task id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current state without waiting
    pub fn poll(&self) -> TaskStatus {
        self.status.borrow().clone()
    }

    /// Request cancellation; a queued task is cancelled immediately, a
    /// running one at its next batch boundary
    pub fn cancel(&self) {
        self.cancel.cancel();
        if let Some(sender) = self.sender.upgrade() {
            sender.send_if_modified(|status| {
                if matches!(status, TaskStatus::Pending) {
                    *status = TaskStatus::Cancelled;
                    true
                } else {
                    false
                }
            });
        }
    }

    /// Wait for a final state
    pub async fn wait(&self) -> TaskStatus {
        let mut receiver = self.status.clone();
        let status = match receiver.wait_for(TaskStatus::is_terminal).await {
            Ok(status) => status.clone(),
            Err(_) => TaskStatus::Failed(Arc::new(Error::internal(
                "scheduler dropped the task before it finished",
            ))),
        };
        status
    }
}

enum Command {
    Run(Job),
    Shutdown,
}

enum JobSource {
    Document(Document),
    Path(PathBuf),
}

struct Job {
    id: u64,
    source: JobSource,
    status: Arc<watch::Sender<TaskStatus>>,
    cancel: CancellationToken,
}

/// Runs scoring jobs one at a time on a background worker
pub struct TaskScheduler {
    sender: mpsc::UnboundedSender<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
    engine: ScoringEngine,
}

impl TaskScheduler {
    /// Start the worker; idle release follows `idle_unload_seconds`.
    /// Must be called from within a tokio runtime.
    pub fn new(engine: ScoringEngine) -> Self {
        let idle = engine.config().idle_unload();
        Self::with_idle_unload(engine, idle)
    }

    /// Start the worker with an explicit idle period (`None` never releases)
    pub fn with_idle_unload(engine: ScoringEngine, idle: Option<Duration>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let loader = DocumentLoader::from_config(engine.config());
        let worker = tokio::spawn(run_worker(engine.clone(), loader, receiver, idle));

        info!(
            "Task scheduler started (idle unload: {})",
            idle.map(|d| format!("{:?}", d))
                .unwrap_or_else(|| "disabled".to_string())
        );

        Self {
            sender,
            worker: Mutex::new(Some(worker)),
            next_id: AtomicU64::new(1),
            engine,
        }
    }

    /// Queue an in-memory document
    pub fn submit(&self, document: Document) -> TaskHandle {
        self.enqueue(JobSource::Document(document))
    }

    /// Queue a file; it is loaded on the worker
    pub fn submit_path(&self, path: impl Into<PathBuf>) -> TaskHandle {
        self.enqueue(JobSource::Path(path.into()))
    }

    /// Engine the worker runs
    pub fn engine(&self) -> &ScoringEngine {
        &self.engine
    }

    /// Finish queued work, stop the worker and release the runtime
    pub async fn shutdown(&self) {
        let _ = self.sender.send(Command::Shutdown);
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!("Scheduler worker ended abnormally: {}", e);
            }
        }
        self.engine.runtime().release();
        info!("Task scheduler stopped");
    }

    fn enqueue(&self, source: JobSource) -> TaskHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = watch::channel(TaskStatus::Pending);
        let sender = Arc::new(sender);
        let handle = TaskHandle {
            id,
            status: receiver,
            sender: Arc::downgrade(&sender),
            cancel: CancellationToken::new(),
        };

        let job = Job {
            id,
            source,
            status: sender,
            cancel: handle.cancel.clone(),
        };
        match self.sender.send(Command::Run(job)) {
            Ok(()) => debug!("Task {} queued", id),
            Err(mpsc::error::SendError(command)) => {
                warn!("Task {} submitted after shutdown", id);
                if let Command::Run(job) = command {
                    job.status.send_replace(TaskStatus::Failed(Arc::new(Error::internal(
                        "scheduler is shut down",
                    ))));
                }
            }
        }
        handle
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        let _ = self.sender.send(Command::Shutdown);
    }
}

async fn run_worker(
    engine: ScoringEngine,
    loader: DocumentLoader,
    mut receiver: mpsc::UnboundedReceiver<Command>,
    idle: Option<Duration>,
) {
    loop {
        let command = match idle {
            Some(idle) => match tokio::time::timeout(idle, receiver.recv()).await {
                Ok(command) => command,
                Err(_) => {
                    if engine.runtime().release_if_idle(idle) {
                        info!("Runtime idle for {:?}, released", idle);
                    }
                    continue;
                }
            },
            None => receiver.recv().await,
        };

        match command {
            Some(Command::Run(job)) => run_job(&engine, &loader, job).await,
            Some(Command::Shutdown) | None => break,
        }
    }
    debug!("Scheduler worker exiting");
}

async fn run_job(engine: &ScoringEngine, loader: &DocumentLoader, job: Job) {
    let started = job.status.send_if_modified(|status| {
        if matches!(status, TaskStatus::Pending) && !job.cancel.is_cancelled() {
            *status = TaskStatus::Running(Progress::default());
            true
        } else {
            false
        }
    });
    if !started {
        job.status.send_replace(TaskStatus::Cancelled);
        debug!("Task {} cancelled before start", job.id);
        return;
    }

    let document = match job.source {
        JobSource::Document(document) => document,
        JobSource::Path(path) => {
            let loader = *loader;
            let loaded = tokio::task::spawn_blocking(move || loader.load(path))
                .await
                .unwrap_or_else(|e| Err(Error::internal(format!("loader task failed: {}", e))));
            match loaded {
                Ok(document) => document,
                Err(e) => {
                    warn!("Task {} failed to load document: {}", job.id, e);
                    job.status.send_replace(TaskStatus::Failed(Arc::new(e)));
                    return;
                }
            }
        }
    };

    let status = Arc::clone(&job.status);
    let control = RunControl::new(job.cancel.clone()).with_progress(move |progress| {
        status.send_replace(TaskStatus::Running(progress));
    });

    let terminal = match engine.score_with(&document, &control).await {
        Ok(report) => TaskStatus::Done(Arc::new(report)),
        Err(Error::Cancelled) => TaskStatus::Cancelled,
        Err(e) => {
            warn!("Task {} failed: {}", job.id, e);
            TaskStatus::Failed(Arc::new(e))
        }
    };
    debug!("Task {} finished: {}", job.id, terminal.label());
    job.status.send_replace(terminal);
}
