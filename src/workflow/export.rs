//! Export: stored posts → native archive.
//!
//! Steps:
//!
//! 1. `build-archive` renders every selected post (front matter + markdown,
//!    lossless `content.json`, image files) into one archive, adds
//!    `tags.json` and `manifest.json`, and stores it as
//!    `exports/<task id>.zip`. Image bytes cannot cross a step boundary, so
//!    the whole per-post loop lives inside this single step.
//! 2. `cleanup-delay` sleeps durably for the retention window.
//! 3. `cleanup` deletes the stored archive.
//!
//! The progress record turns `completed` right after step 1; the cleanup
//! steps only keep the task journal open.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use blogport_core::archive::Archive;
use blogport_core::entries::{MANIFEST_PATH, POSTS_PREFIX, TAGS_PATH};
use blogport_core::frontmatter::{self, PostMetadata};
use blogport_core::images::{extract_image_keys, image_file_names, storage_key_from_src};
use blogport_core::markdown::{tree_to_markdown, RenderOptions};
use blogport_core::models::{
    Manifest, Post, PostFilter, ProgressError, TagListing, TaskProgress, TaskStatus,
};

use super::{StepRunner, TaskContext};

pub const GENERATOR: &str = concat!("blogport ", env!("CARGO_PKG_VERSION"));

/// Blob key of an export task's archive.
pub fn archive_key(task_id: &str) -> String {
    format!("exports/{}.zip", task_id)
}

/// What `build-archive` journals: no bytes, only the outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportSummary {
    pub download_key: String,
    pub post_count: usize,
    pub errors: Vec<ProgressError>,
    pub warnings: Vec<String>,
}

pub async fn run(ctx: &TaskContext, runner: &mut StepRunner, filter: PostFilter) -> Result<()> {
    if !runner.is_replaying() {
        ctx.publish(&TaskProgress::pending()).await?;
    }

    let summary: ExportSummary = runner
        .step("build-archive", || build_archive(ctx, &filter))
        .await?;

    let mut progress = TaskProgress::pending();
    progress.status = TaskStatus::Completed;
    progress.total = summary.post_count + summary.errors.len();
    progress.completed = progress.total;
    progress.errors = summary.errors.clone();
    progress.warnings = summary.warnings.clone();
    progress.download_key = Some(summary.download_key.clone());
    ctx.publish(&progress).await?;
    info!(task_id = %ctx.task_id, posts = summary.post_count, "export completed");

    let retention = chrono::Duration::from_std(ctx.settings.export_retention)
        .context("export retention out of range")?;
    runner
        .sleep_until("cleanup-delay", Utc::now() + retention)
        .await?;

    let key = summary.download_key.clone();
    runner
        .step("cleanup", || async {
            ctx.collab.blobs.delete(&key).await?;
            info!(task_id = %ctx.task_id, key = %key, "deleted expired export");
            Ok(())
        })
        .await?;
    Ok(())
}

async fn build_archive(ctx: &TaskContext, filter: &PostFilter) -> Result<ExportSummary> {
    let posts = ctx.collab.posts.list_posts(filter).await?;
    let total = posts.len();

    let mut archive = Archive::new();
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut exported = 0usize;

    for (i, post) in posts.iter().enumerate() {
        ctx.cancel.check()?;

        let mut progress = TaskProgress::pending();
        progress.status = TaskStatus::Processing;
        progress.total = total;
        progress.completed = i;
        progress.current = post.title.clone();
        progress.errors = errors.clone();
        progress.warnings = warnings.clone();
        ctx.publish(&progress).await?;

        match add_post(ctx, &mut archive, post, &mut warnings).await {
            Ok(()) => exported += 1,
            Err(e) => {
                warn!(post = %post.slug, error = %e, "post left out of export");
                errors.push(ProgressError {
                    post: post.title.clone(),
                    reason: format!("{:#}", e),
                });
            }
        }
    }

    let tags: Vec<TagListing> = ctx
        .collab
        .posts
        .list_tags()
        .await?
        .into_iter()
        .map(|t| TagListing {
            name: t.name,
            created_at: t.created_at,
        })
        .collect();
    archive.insert_text(TAGS_PATH, &serde_json::to_string_pretty(&tags)?)?;

    let manifest = Manifest {
        version: Manifest::VERSION.to_string(),
        exported_at: Utc::now(),
        post_count: exported,
        generator: GENERATOR.to_string(),
    };
    archive.insert_text(MANIFEST_PATH, &serde_json::to_string_pretty(&manifest)?)?;

    let bytes = archive.to_bytes()?;
    let download_key = archive_key(&ctx.task_id);
    ctx.collab
        .blobs
        .put(&download_key, bytes, "application/zip")
        .await
        .with_context(|| format!("Failed to store export archive {}", download_key))?;

    Ok(ExportSummary {
        download_key,
        post_count: exported,
        errors,
        warnings,
    })
}

/// Write `posts/<slug>/{index.md,content.json,images/*}` for one post.
async fn add_post(
    ctx: &TaskContext,
    archive: &mut Archive,
    post: &Post,
    warnings: &mut Vec<String>,
) -> Result<()> {
    let dir = format!("{}{}", POSTS_PREFIX, post.slug);

    let keys = extract_image_keys(&post.content);
    let names: HashMap<String, String> = image_file_names(&keys).into_iter().collect();
    let mut files = Vec::with_capacity(names.len());
    for key in &keys {
        let Some(name) = names.get(key) else {
            continue;
        };
        match ctx.collab.blobs.get(key).await? {
            Some(bytes) => files.push((format!("{}/images/{}", dir, name), bytes)),
            None => {
                warn!(post = %post.slug, key = %key, "image missing from blob store");
                warnings.push(format!("{}: image {} not found in storage", post.title, key));
            }
        }
    }

    let rewrite = |src: &str| -> String {
        storage_key_from_src(src)
            .and_then(|key| names.get(&key))
            .map(|name| format!("images/{}", name))
            .unwrap_or_else(|| src.to_string())
    };
    let body = tree_to_markdown(
        &post.content,
        &RenderOptions {
            image_src: Some(&rewrite),
        },
    );

    let metadata = PostMetadata {
        title: post.title.clone(),
        slug: post.slug.clone(),
        summary: post.summary.clone(),
        status: post.status,
        published_at: post.published_at,
        created_at: Some(post.created_at),
        updated_at: Some(post.updated_at),
        read_time_in_minutes: post.read_time_in_minutes,
        tags: post.tags.clone(),
    };
    let index = frontmatter::stringify(&metadata, &body)?;
    let content = serde_json::to_string_pretty(&post.content)?;

    // All paths are checked before the first insert: a failing post adds nothing.
    let mut staged = vec![
        (format!("{}/index.md", dir), index.into_bytes()),
        (format!("{}/content.json", dir), content.into_bytes()),
    ];
    staged.extend(files);
    for (path, _) in &staged {
        if archive.contains(path) {
            anyhow::bail!("duplicate archive path {}", path);
        }
    }
    for (path, bytes) in staged {
        archive.insert(path, bytes)?;
    }
    Ok(())
}
