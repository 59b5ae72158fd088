//! Import: archive → stored posts.
//!
//! Steps:
//!
//! 1. `enumerate` fetches `imports/<task id>.zip`, picks the dialect, and
//!    journals the [`PostEntry`] list.
//! 2. `import-<n>-<name>` per entry: parse front matter and content, skip
//!    on slug collision, relocate images, resolve tags, insert the post.
//!    Each returns a [`UnitDelta`]; the report is re-derived by folding
//!    deltas, so a replay rebuilds it exactly.
//! 3. `finalize` deletes the source archive.
//!
//! Per-unit problems (bad content, missing image, slug collision, a unit
//! timing out) land in the report. Only structural failures (archive
//! unreadable, enumerate or finalize failing, journal divergence) fail the
//! task.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use blogport_core::archive::Archive;
use blogport_core::document::Node;
use blogport_core::entries::{self, Dialect, PostEntry};
use blogport_core::frontmatter;
use blogport_core::markdown::markdown_to_tree;
use blogport_core::models::{
    FailedEntry, ImportReport, InsertOutcome, NewPost, ProgressError, ReportEntry, TaskProgress,
    TaskStatus, UnitDelta,
};
use blogport_core::relocate::{relocate_markdown_images, relocate_tree_images};

use super::{StepError, StepRunner, TaskContext};

/// Blob key under which an import's source archive is staged.
pub fn archive_key(task_id: &str) -> String {
    format!("imports/{}.zip", task_id)
}

/// Journalled parameters of an import task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportParams {
    pub archive_key: String,
    pub mode: Dialect,
}

/// The source archive, fetched and parsed at most once per process run.
/// Journalled steps never carry its bytes.
struct ArchiveCache<'a> {
    ctx: &'a TaskContext,
    key: &'a str,
    archive: OnceCell<Arc<Archive>>,
}

impl<'a> ArchiveCache<'a> {
    fn new(ctx: &'a TaskContext, key: &'a str) -> Self {
        Self {
            ctx,
            key,
            archive: OnceCell::new(),
        }
    }

    async fn get(&self) -> Result<Arc<Archive>> {
        let archive = self
            .archive
            .get_or_try_init(|| async {
                let bytes = self
                    .ctx
                    .collab
                    .blobs
                    .get(self.key)
                    .await?
                    .with_context(|| format!("source archive {} not found", self.key))?;
                let archive = Archive::from_bytes(&bytes)
                    .with_context(|| format!("source archive {} is unreadable", self.key))?;
                Ok::<_, anyhow::Error>(Arc::new(archive))
            })
            .await?;
        Ok(archive.clone())
    }
}

pub async fn run(ctx: &TaskContext, runner: &mut StepRunner, params: ImportParams) -> Result<()> {
    if !runner.is_replaying() {
        ctx.publish(&TaskProgress::pending()).await?;
    }
    let cache = ArchiveCache::new(ctx, &params.archive_key);

    let entries: Vec<PostEntry> = runner
        .step("enumerate", || async {
            let archive = cache.get().await?;
            let found = entries::enumerate(&archive, params.mode);
            info!(task_id = %ctx.task_id, mode = ?params.mode, entries = found.len(), "archive enumerated");
            Ok(found)
        })
        .await?;

    let total = entries.len();
    let mut report = ImportReport::default();
    if total == 0 {
        report
            .warnings
            .push("no importable posts found in archive".to_string());
    }

    for (i, entry) in entries.iter().enumerate() {
        ctx.cancel.check()?;

        if !runner.is_replaying() {
            let mut progress = snapshot(&report, total, i);
            progress.current = entry.title.clone();
            ctx.publish(&progress).await?;
        }

        let step_name = format!("import-{}-{}", i, entry.name);
        let timeout = ctx.settings.unit_timeout;
        let result = runner
            .step(&step_name, || async {
                match tokio::time::timeout(timeout, import_entry(ctx, &cache, entry, params.mode))
                    .await
                {
                    Ok(Ok(delta)) => Ok(delta),
                    Ok(Err(e)) => Ok(failed_delta(entry, format!("{:#}", e))),
                    Err(_) => Ok(failed_delta(
                        entry,
                        format!("timed out after {}s", timeout.as_secs()),
                    )),
                }
            })
            .await;

        let delta = match result {
            Ok(delta) => delta,
            Err(err @ StepError::Diverged { .. }) => return Err(err.into()),
            Err(StepError::Failed(reason)) => failed_delta(entry, reason),
        };
        report.apply(&delta);

        ctx.publish(&snapshot(&report, total, i + 1)).await?;
    }

    runner
        .step("finalize", || async {
            ctx.collab.blobs.delete(&params.archive_key).await?;
            Ok(())
        })
        .await?;

    let mut progress = snapshot(&report, total, total);
    progress.status = TaskStatus::Completed;
    progress.report = Some(report);
    ctx.publish(&progress).await?;
    info!(task_id = %ctx.task_id, summary = %progress.summary(), "import completed");
    Ok(())
}

fn snapshot(report: &ImportReport, total: usize, completed: usize) -> TaskProgress {
    let mut progress = TaskProgress::pending();
    progress.status = TaskStatus::Processing;
    progress.total = total;
    progress.completed = completed;
    progress.errors = report
        .failed
        .iter()
        .map(|f| ProgressError {
            post: f.title.clone(),
            reason: f.reason.clone(),
        })
        .collect();
    progress.warnings = report.warnings.clone();
    progress
}

fn failed_delta(entry: &PostEntry, reason: String) -> UnitDelta {
    warn!(post = %entry.title, %reason, "post import failed");
    UnitDelta {
        failed: Some(FailedEntry {
            title: entry.title.clone(),
            reason,
        }),
        ..Default::default()
    }
}

async fn import_entry(
    ctx: &TaskContext,
    cache: &ArchiveCache<'_>,
    entry: &PostEntry,
    mode: Dialect,
) -> Result<UnitDelta> {
    let archive = cache.get().await?;
    let path = entry.markdown_file();
    let text = archive
        .read_text(&path)
        .with_context(|| format!("{} is missing or not UTF-8", path))?;

    let parsed = frontmatter::parse(&text);
    // Same title fallback the enumerator used to accept this entry.
    let meta = match frontmatter::normalize(&parsed.metadata) {
        Some(meta) => meta,
        None => {
            let mut fields = parsed.metadata.clone();
            fields.insert("title".to_string(), Value::String(entry.title.clone()));
            frontmatter::normalize(&fields)
                .with_context(|| format!("{} has no usable title", path))?
        }
    };

    let posts = &ctx.collab.posts;
    if posts.slug_exists(&meta.slug).await? {
        return Ok(collision(&meta.title, &meta.slug));
    }

    let mut warnings = Vec::new();
    let content = match native_tree(&archive, entry, mode, &mut warnings) {
        Some(tree) => {
            let relocated =
                relocate_tree_images(&archive, &entry.image_dir(), &tree, ctx.collab.blobs.as_ref())
                    .await?;
            warnings.extend(relocated.warnings);
            relocated.value
        }
        None => {
            let relocated = relocate_markdown_images(
                &archive,
                &entry.base_dir,
                &parsed.body,
                ctx.collab.blobs.as_ref(),
            )
            .await?;
            warnings.extend(relocated.warnings);
            markdown_to_tree(&relocated.value)
        }
    };

    let mut tag_ids: Vec<String> = Vec::with_capacity(meta.tags.len());
    for name in &meta.tags {
        let tag = posts.upsert_tag(name).await?;
        if !tag_ids.contains(&tag.id) {
            tag_ids.push(tag.id);
        }
    }

    let post = NewPost {
        title: meta.title.clone(),
        slug: meta.slug.clone(),
        summary: meta.summary.clone(),
        status: meta.status,
        content,
        read_time_in_minutes: meta.read_time_in_minutes,
        published_at: meta.published_at,
        created_at: meta.created_at,
        updated_at: meta.updated_at,
        tag_ids,
    };
    let warnings: Vec<String> = warnings
        .into_iter()
        .map(|w| format!("{}: {}", meta.title, w))
        .collect();

    match posts.insert_post(&post).await? {
        InsertOutcome::Inserted(id) => {
            debug!(post_id = %id, slug = %meta.slug, "post imported");
            Ok(UnitDelta {
                succeeded: Some(ReportEntry {
                    title: meta.title,
                    slug: meta.slug,
                }),
                warnings,
                ..Default::default()
            })
        }
        // Lost a race with a concurrent import of the same slug.
        InsertOutcome::SlugTaken => Ok(collision(&meta.title, &meta.slug)),
    }
}

fn collision(title: &str, slug: &str) -> UnitDelta {
    UnitDelta {
        skipped: true,
        warnings: vec![format!(
            "{}: skipped, slug \"{}\" already exists",
            title, slug
        )],
        ..Default::default()
    }
}

/// The lossless tree of a native entry, when present and readable.
fn native_tree(
    archive: &Archive,
    entry: &PostEntry,
    mode: Dialect,
    warnings: &mut Vec<String>,
) -> Option<Node> {
    if mode != Dialect::Native {
        return None;
    }
    let path = entry.content_json_path();
    if !archive.contains(&path) {
        return None;
    }
    match archive.read_json::<Node>(&path) {
        Some(tree @ Node::Doc { .. }) => Some(tree),
        _ => {
            warnings.push(format!("{} unreadable, content rebuilt from markdown", path));
            None
        }
    }
}
