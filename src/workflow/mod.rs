//! Export and import workflows on top of the durable step executor.
//!
//! Both flows share one shape:
//!
//! ```text
//! pending → enumerate → processing × N → finalize → completed
//!     \__________________ any task-fatal error __________________→ failed
//! ```
//!
//! [`run_task`] drives a journalled task to its terminal state. It is used
//! for fresh tasks and for re-driving unfinished ones after a restart; in
//! the latter case every journalled step is replayed before live work
//! resumes.

pub mod executor;
pub mod export;
pub mod import;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info, warn};

use blogport_core::models::{TaskKind, TaskProgress};
use blogport_core::store::{BlobStore, CheckpointStore, KvStore, PostStore, TaskRecord};

use crate::config::TasksConfig;
use crate::progress::ProgressTracker;

pub use executor::{StepError, StepRunner};

/// Warning recorded when a task is stopped by [`CancelFlag::cancel`].
pub const CANCELLED: &str = "cancelled";

/// The storage collaborators a workflow runs against.
#[derive(Clone)]
pub struct Collaborators {
    pub posts: Arc<dyn PostStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub kv: Arc<dyn KvStore>,
    pub journal: Arc<dyn CheckpointStore>,
}

#[derive(Debug, Clone, Copy)]
pub struct WorkflowSettings {
    pub progress_ttl: Duration,
    pub export_retention: Duration,
    pub unit_timeout: Duration,
}

impl From<&TasksConfig> for WorkflowSettings {
    fn from(tasks: &TasksConfig) -> Self {
        Self {
            progress_ttl: tasks.progress_ttl(),
            export_retention: tasks.export_retention(),
            unit_timeout: tasks.unit_timeout(),
        }
    }
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self::from(&TasksConfig::default())
    }
}

/// Cooperative stop signal, checked between units.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(cancelled)` once the flag is set.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            anyhow::bail!(CANCELLED);
        }
        Ok(())
    }
}

/// Everything one running task needs.
#[derive(Clone)]
pub struct TaskContext {
    pub task_id: String,
    pub kind: TaskKind,
    pub collab: Collaborators,
    pub settings: WorkflowSettings,
    pub progress: ProgressTracker,
    pub cancel: CancelFlag,
}

impl TaskContext {
    pub fn new(
        task_id: &str,
        kind: TaskKind,
        collab: Collaborators,
        settings: WorkflowSettings,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            task_id: task_id.to_string(),
            kind,
            progress: ProgressTracker::new(collab.kv.clone(), settings.progress_ttl),
            collab,
            settings,
            cancel,
        }
    }

    pub async fn publish(&self, progress: &TaskProgress) -> Result<()> {
        self.progress.write(self.kind, &self.task_id, progress).await
    }
}

/// Drive a journalled task to completion, then close its journal.
///
/// A task-fatal error becomes a `failed` progress record with the error as
/// its one-line reason, unless the task already published a terminal
/// record (e.g. an export whose cleanup failed after completion).
pub async fn run_task(ctx: TaskContext, record: TaskRecord) {
    let task_id = ctx.task_id.clone();
    info!(task_id = %task_id, kind = ctx.kind.as_str(), "task started");

    let outcome = match StepRunner::open(&task_id, ctx.collab.journal.clone()).await {
        Ok(mut runner) => match record.kind {
            TaskKind::Export => match serde_json::from_value(record.params.clone()) {
                Ok(filter) => export::run(&ctx, &mut runner, filter).await,
                Err(e) => Err(anyhow::anyhow!("invalid export parameters: {}", e)),
            },
            TaskKind::Import => match serde_json::from_value(record.params.clone()) {
                Ok(params) => import::run(&ctx, &mut runner, params).await,
                Err(e) => Err(anyhow::anyhow!("invalid import parameters: {}", e)),
            },
        },
        Err(e) => Err(e),
    };

    match outcome {
        Ok(()) => info!(task_id = %task_id, "task finished"),
        Err(err) => {
            let reason = format!("{:#}", err);
            warn!(task_id = %task_id, %reason, "task failed");
            let current = ctx.progress.read(ctx.kind, &task_id).await.ok().flatten();
            let already_terminal = current
                .as_ref()
                .map(|p| p.status.is_terminal())
                .unwrap_or(false);
            if !already_terminal {
                let failed = current.unwrap_or_else(TaskProgress::pending).failed(reason);
                if let Err(e) = ctx.publish(&failed).await {
                    error!(task_id = %task_id, error = %e, "could not publish failure");
                }
            }
        }
    }

    if let Err(e) = ctx.collab.journal.finish_task(&task_id).await {
        error!(task_id = %task_id, error = %e, "could not close task journal");
    }
}
