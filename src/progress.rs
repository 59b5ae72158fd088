//! Task progress: the status store record and CLI reporting.
//!
//! Workflows publish a [`TaskProgress`] snapshot to the key-value status
//! store after every unit ([`ProgressTracker`]). Writes are whole-record
//! overwrites, so repeating one after a replay is harmless. Callers poll
//! the same record.
//!
//! The CLI turns polled snapshots into lines on **stderr** so stdout
//! remains parseable for scripts.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use blogport_core::models::{TaskKind, TaskProgress, TaskStatus};
use blogport_core::store::KvStore;

/// Reads and writes progress records in the status store.
#[derive(Clone)]
pub struct ProgressTracker {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl ProgressTracker {
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    pub async fn write(&self, kind: TaskKind, task_id: &str, progress: &TaskProgress) -> Result<()> {
        let value = serde_json::to_string(progress)?;
        self.kv
            .set(&kind.progress_key(task_id), &value, self.ttl)
            .await
            .with_context(|| format!("Failed to write progress for {} task {}", kind.as_str(), task_id))
    }

    pub async fn read(&self, kind: TaskKind, task_id: &str) -> Result<Option<TaskProgress>> {
        let Some(value) = self.kv.get(&kind.progress_key(task_id)).await? else {
            return Ok(None);
        };
        let progress = serde_json::from_str(&value)
            .with_context(|| format!("Corrupt progress record for {} task {}", kind.as_str(), task_id))?;
        Ok(Some(progress))
    }
}

/// Reports polled task progress. Implementations write to stderr.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, kind: TaskKind, task_id: &str, progress: &TaskProgress);
}

/// Human-friendly progress on stderr: "import 3f2a…  processing  3 / 12  My Post".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, kind: TaskKind, task_id: &str, progress: &TaskProgress) {
        let short_id: String = task_id.chars().take(8).collect();
        let line = match progress.status {
            TaskStatus::Pending => format!("{} {}  pending\n", kind.as_str(), short_id),
            TaskStatus::Processing => format!(
                "{} {}  processing  {} / {}  {}\n",
                kind.as_str(),
                short_id,
                format_number(progress.completed as u64),
                format_number(progress.total as u64),
                progress.current
            ),
            TaskStatus::Completed | TaskStatus::Failed => format!(
                "{} {}  {}  {}\n",
                kind.as_str(),
                short_id,
                status_label(progress.status),
                progress.summary()
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, kind: TaskKind, task_id: &str, progress: &TaskProgress) {
        let obj = serde_json::json!({
            "event": "progress",
            "kind": kind,
            "taskId": task_id,
            "progress": progress,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _kind: TaskKind, _task_id: &str, _progress: &TaskProgress) {}
}

fn status_label(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Processing => "processing",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
    }
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
