//! Task entry points shared by the CLI and the HTTP server.
//!
//! [`TaskService`] creates journalled export/import tasks, runs them on the
//! tokio runtime, and answers progress queries from the status store. Task
//! bodies live in [`crate::workflow`]; this module only starts, cancels,
//! and re-drives them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use blogport_core::archive::Archive;
use blogport_core::entries::{detect_dialect, Dialect};
use blogport_core::models::{PostFilter, TaskKind, TaskProgress, TaskStatus};
use blogport_core::store::TaskRecord;

use crate::blobs::FsBlobStore;
use crate::config::Config;
use crate::progress::ProgressTracker;
use crate::sqlite_store::SqliteStore;
use crate::workflow::import::{self, ImportParams};
use crate::workflow::{run_task, CancelFlag, Collaborators, TaskContext, WorkflowSettings};

/// Which posts to export. An empty request exports every post.
pub type ExportRequest = PostFilter;

/// One file handed to [`TaskService::start_import`].
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// File name, or archive-relative path when a directory was uploaded.
    pub name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportStarted {
    pub task_id: String,
    pub mode: Dialect,
}

#[derive(Clone)]
pub struct TaskService {
    collab: Collaborators,
    settings: WorkflowSettings,
    progress: ProgressTracker,
    running: Arc<Mutex<HashMap<String, CancelFlag>>>,
}

impl TaskService {
    pub fn new(collab: Collaborators, settings: WorkflowSettings) -> Self {
        Self {
            progress: ProgressTracker::new(collab.kv.clone(), settings.progress_ttl),
            collab,
            settings,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// SQLite for posts, progress and journal; the filesystem for blobs.
    /// Runs migrations, so a fresh database is usable immediately.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = crate::db::connect(config).await?;
        crate::migrate::apply(&pool).await?;
        let store = Arc::new(SqliteStore::new(pool));
        let collab = Collaborators {
            posts: store.clone(),
            blobs: Arc::new(FsBlobStore::from_config(config)),
            kv: store.clone(),
            journal: store,
        };
        Ok(Self::new(collab, WorkflowSettings::from(&config.tasks)))
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collab
    }

    pub async fn start_export(&self, request: ExportRequest) -> Result<String> {
        let task_id = Uuid::new_v4().to_string();
        let params = serde_json::to_value(&request)?;
        self.launch(&task_id, TaskKind::Export, params).await?;
        Ok(task_id)
    }

    /// Stage the upload as the task's source archive and start importing.
    ///
    /// A single `.zip` file is taken as the archive itself; any other set of
    /// files is bundled into one under their names. The archive is opened
    /// here so an unreadable upload is rejected before a task exists.
    pub async fn start_import(&self, files: Vec<UploadedFile>) -> Result<ImportStarted> {
        if files.is_empty() {
            bail!("no files uploaded");
        }
        let (archive, bytes) = match files.as_slice() {
            [file] if file.name.to_ascii_lowercase().ends_with(".zip") => {
                let archive = Archive::from_bytes(&file.bytes)
                    .with_context(|| format!("{} is not a readable zip archive", file.name))?;
                (archive, file.bytes.clone())
            }
            _ => {
                let archive = Archive::from_entries(
                    files.into_iter().map(|f| (f.name, f.bytes)),
                )
                .context("uploaded files cannot be bundled into an archive")?;
                let bytes = archive.to_bytes()?;
                (archive, bytes)
            }
        };

        let mode = detect_dialect(&archive);
        let task_id = Uuid::new_v4().to_string();
        let archive_key = import::archive_key(&task_id);
        self.collab
            .blobs
            .put(&archive_key, bytes, "application/zip")
            .await
            .with_context(|| format!("Failed to stage import archive {}", archive_key))?;

        let params = serde_json::to_value(ImportParams { archive_key, mode })?;
        self.launch(&task_id, TaskKind::Import, params).await?;
        Ok(ImportStarted { task_id, mode })
    }

    pub async fn export_progress(&self, task_id: &str) -> Result<Option<TaskProgress>> {
        self.progress.read(TaskKind::Export, task_id).await
    }

    pub async fn import_progress(&self, task_id: &str) -> Result<Option<TaskProgress>> {
        self.progress.read(TaskKind::Import, task_id).await
    }

    pub async fn progress(&self, kind: TaskKind, task_id: &str) -> Result<Option<TaskProgress>> {
        self.progress.read(kind, task_id).await
    }

    /// Archive bytes of a completed export, while they are retained.
    pub async fn download_export(&self, task_id: &str) -> Result<Option<Vec<u8>>> {
        let Some(progress) = self.export_progress(task_id).await? else {
            return Ok(None);
        };
        if progress.status != TaskStatus::Completed {
            return Ok(None);
        }
        match progress.download_key {
            Some(key) => self.collab.blobs.get(&key).await,
            None => Ok(None),
        }
    }

    /// Ask a running task to stop after its current unit. Returns `false`
    /// when no task with that id runs in this process.
    pub fn cancel(&self, task_id: &str) -> bool {
        let running = match self.running.lock() {
            Ok(running) => running,
            Err(poisoned) => poisoned.into_inner(),
        };
        match running.get(task_id) {
            Some(flag) => {
                flag.cancel();
                info!(task_id, "cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Re-drive every journalled task that never finished. Returns the
    /// tasks that were started.
    pub async fn resume_unfinished(&self) -> Result<Vec<TaskRecord>> {
        let tasks = self.collab.journal.unfinished_tasks().await?;
        let mut resumed = Vec::with_capacity(tasks.len());
        for record in tasks {
            if self.is_running(&record.id) {
                continue;
            }
            info!(task_id = %record.id, kind = record.kind.as_str(), "resuming task");
            resumed.push(record.clone());
            self.spawn(record);
        }
        Ok(resumed)
    }

    /// Poll a task's progress until it reaches a terminal state, handing
    /// every snapshot to `on_progress`.
    pub async fn wait(
        &self,
        kind: TaskKind,
        task_id: &str,
        poll_interval: std::time::Duration,
        mut on_progress: impl FnMut(&TaskProgress),
    ) -> Result<TaskProgress> {
        loop {
            if let Some(progress) = self.progress(kind, task_id).await? {
                on_progress(&progress);
                if progress.status.is_terminal() {
                    return Ok(progress);
                }
            } else if !self.is_running(task_id) {
                bail!("{} task {} not found", kind.as_str(), task_id);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Wait until the task body has returned in this process, journal
    /// closed. Terminal progress is published slightly earlier.
    pub async fn wait_until_idle(&self, task_id: &str, poll_interval: std::time::Duration) {
        while self.is_running(task_id) {
            tokio::time::sleep(poll_interval).await;
        }
    }

    fn is_running(&self, task_id: &str) -> bool {
        self.running
            .lock()
            .map(|r| r.contains_key(task_id))
            .unwrap_or(false)
    }

    async fn launch(&self, task_id: &str, kind: TaskKind, params: serde_json::Value) -> Result<()> {
        let record = TaskRecord {
            id: task_id.to_string(),
            kind,
            params,
            created_at: Utc::now(),
            finished_at: None,
        };
        self.collab
            .journal
            .create_task(&record)
            .await
            .with_context(|| format!("Failed to record {} task {}", kind.as_str(), task_id))?;
        // Visible to pollers before the task body gets scheduled.
        self.progress
            .write(kind, task_id, &TaskProgress::pending())
            .await?;
        self.spawn(record);
        Ok(())
    }

    fn spawn(&self, record: TaskRecord) {
        let cancel = CancelFlag::default();
        match self.running.lock() {
            Ok(mut running) => {
                running.insert(record.id.clone(), cancel.clone());
            }
            Err(_) => warn!(task_id = %record.id, "task registry poisoned; task not cancellable"),
        }

        let ctx = TaskContext::new(
            &record.id,
            record.kind,
            self.collab.clone(),
            self.settings,
            cancel,
        );
        let running = self.running.clone();
        tokio::spawn(async move {
            let task_id = record.id.clone();
            run_task(ctx, record).await;
            if let Ok(mut running) = running.lock() {
                running.remove(&task_id);
            }
        });
    }
}
