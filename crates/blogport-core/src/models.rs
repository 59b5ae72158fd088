//! Core data models shared by the pipeline and its storage collaborators.
//!
//! Progress and report types serialize in camelCase because they are
//! returned verbatim to callers polling a task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::Node;
use crate::frontmatter::PostStatus;

/// A stored post, as read back from the post store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub summary: Option<String>,
    pub status: PostStatus,
    pub content: Node,
    pub read_time_in_minutes: u32,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Tag names in attachment order.
    pub tags: Vec<String>,
}

/// A post about to be inserted. Missing timestamps default to now.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPost {
    pub title: String,
    pub slug: String,
    pub summary: Option<String>,
    pub status: PostStatus,
    pub content: Node,
    pub read_time_in_minutes: u32,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub tag_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Which posts an export includes. Empty filter means every post.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostFilter {
    #[serde(default)]
    pub post_ids: Option<Vec<String>>,
    #[serde(default)]
    pub status: Option<PostStatus>,
}

impl PostFilter {
    pub fn matches(&self, post: &Post) -> bool {
        let id_ok = self
            .post_ids
            .as_ref()
            .map(|ids| ids.iter().any(|id| id == &post.id))
            .unwrap_or(true);
        let status_ok = self.status.map(|s| s == post.status).unwrap_or(true);
        id_ok && status_ok
    }
}

/// Result of a conditional insert keyed on slug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(String),
    SlugTaken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Export,
    Import,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Export => "export",
            TaskKind::Import => "import",
        }
    }

    /// Key under which a task's progress record lives in the status store.
    pub fn progress_key(&self, task_id: &str) -> String {
        format!("{}:{}", self.as_str(), task_id)
    }
}

impl std::str::FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "export" => Ok(TaskKind::Export),
            "import" => Ok(TaskKind::Import),
            other => Err(format!("unknown task kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// A per-post error surfaced in a progress record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressError {
    pub post: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub title: String,
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedEntry {
    pub title: String,
    pub reason: String,
}

/// Completion report of an import task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportReport {
    pub succeeded: Vec<ReportEntry>,
    pub failed: Vec<FailedEntry>,
    pub warnings: Vec<String>,
}

/// Live state of an export or import task, polled by callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgress {
    pub status: TaskStatus,
    pub total: usize,
    pub completed: usize,
    pub current: String,
    #[serde(default)]
    pub errors: Vec<ProgressError>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<ImportReport>,
}

impl TaskProgress {
    pub fn pending() -> Self {
        Self {
            status: TaskStatus::Pending,
            total: 0,
            completed: 0,
            current: String::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            download_key: None,
            report: None,
        }
    }

    /// Terminal `failed` record carrying a one-line reason.
    pub fn failed(mut self, reason: impl Into<String>) -> Self {
        self.status = TaskStatus::Failed;
        self.current = String::new();
        self.warnings.push(reason.into());
        self
    }

    /// "N succeeded, M failed, K warnings" for a finished task.
    pub fn summary(&self) -> String {
        let (succeeded, failed, warnings) = match &self.report {
            Some(report) => (report.succeeded.len(), report.failed.len(), report.warnings.len()),
            None => (
                self.completed.saturating_sub(self.errors.len()),
                self.errors.len(),
                self.warnings.len(),
            ),
        };
        format!(
            "{} succeeded, {} failed, {} warnings",
            succeeded, failed, warnings
        )
    }
}

/// What a single import unit contributed to the task report.
///
/// Returned from a per-unit step and therefore journalled; cumulative
/// totals are always re-derived by folding deltas.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub succeeded: Option<ReportEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<FailedEntry>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub skipped: bool,
}

impl ImportReport {
    pub fn apply(&mut self, delta: &UnitDelta) {
        if let Some(ok) = &delta.succeeded {
            self.succeeded.push(ok.clone());
        }
        if let Some(failed) = &delta.failed {
            self.failed.push(failed.clone());
        }
        self.warnings.extend(delta.warnings.iter().cloned());
    }
}

/// `manifest.json` at the root of a native archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub post_count: usize,
    pub generator: String,
}

impl Manifest {
    pub const VERSION: &'static str = "1";

    pub fn validate(&self) -> Result<(), String> {
        if self.version.trim().is_empty() {
            return Err("manifest version is empty".to_string());
        }
        if self.generator.trim().is_empty() {
            return Err("manifest generator is empty".to_string());
        }
        Ok(())
    }
}

/// One entry of the informational `tags.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagListing {
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn progress_serializes_camel_case() {
        let mut progress = TaskProgress::pending();
        progress.download_key = Some("exports/t.zip".into());
        let value = serde_json::to_value(&progress).unwrap();
        assert_eq!(value["status"], json!("pending"));
        assert_eq!(value["downloadKey"], json!("exports/t.zip"));
        assert!(value.get("report").is_none());
    }

    #[test]
    fn summary_counts_report_entries() {
        let mut progress = TaskProgress::pending();
        let mut report = ImportReport::default();
        report.apply(&UnitDelta {
            succeeded: Some(ReportEntry {
                title: "A".into(),
                slug: "a".into(),
            }),
            ..Default::default()
        });
        report.apply(&UnitDelta {
            failed: Some(FailedEntry {
                title: "B".into(),
                reason: "bad".into(),
            }),
            warnings: vec!["w1".into(), "w2".into()],
            ..Default::default()
        });
        progress.report = Some(report);
        assert_eq!(progress.summary(), "1 succeeded, 1 failed, 2 warnings");
    }

    #[test]
    fn failed_appends_reason() {
        let progress = TaskProgress::pending().failed("archive unreadable");
        assert_eq!(progress.status, TaskStatus::Failed);
        assert_eq!(progress.warnings, vec!["archive unreadable"]);
        assert!(progress.status.is_terminal());
    }

    #[test]
    fn progress_keys_are_namespaced() {
        assert_eq!(TaskKind::Export.progress_key("t1"), "export:t1");
        assert_eq!(TaskKind::Import.progress_key("t1"), "import:t1");
    }
}
