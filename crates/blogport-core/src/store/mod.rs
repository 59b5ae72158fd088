//! Storage collaborators of the import/export pipeline.
//!
//! The pipeline never talks to a database or filesystem directly. It goes
//! through four narrow traits, so the workflows run unchanged against the
//! SQLite/filesystem backends of the `blogport` binary or the in-memory
//! backends in [`memory`].
//!
//! | Trait | Holds |
//! |-------|-------|
//! | [`PostStore`] | posts, tags, and their links |
//! | [`BlobStore`] | archive files and image bytes |
//! | [`KvStore`] | task progress records, with TTL |
//! | [`CheckpointStore`] | the durable step journal |
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{InsertOutcome, NewPost, Post, PostFilter, Tag, TaskKind};

#[async_trait]
pub trait PostStore: Send + Sync {
    /// Posts matching `filter`, ordered by creation time then id.
    async fn list_posts(&self, filter: &PostFilter) -> Result<Vec<Post>>;

    async fn get_post_by_slug(&self, slug: &str) -> Result<Option<Post>>;

    async fn slug_exists(&self, slug: &str) -> Result<bool>;

    /// Insert a post unless its slug is already taken. The check and the
    /// insert are one atomic operation.
    async fn insert_post(&self, post: &NewPost) -> Result<InsertOutcome>;

    /// Return the tag with this name (compared case-insensitively),
    /// creating it if absent. Concurrent callers get the same row.
    async fn upsert_tag(&self, name: &str) -> Result<Tag>;

    async fn list_tags(&self) -> Result<Vec<Tag>>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Overwrite `key`; the value expires after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Current value, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;
}

/// A journalled task, as needed to resume it after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub kind: TaskKind,
    pub params: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Stored result of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "value", rename_all = "lowercase")]
pub enum StepOutcome {
    Ok(serde_json::Value),
    Err(String),
}

/// One entry of a task's append-only journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub seq: u64,
    pub step: String,
    pub outcome: StepOutcome,
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn create_task(&self, task: &TaskRecord) -> Result<()>;

    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>>;

    /// Checkpoints of a task in `seq` order.
    async fn load(&self, task_id: &str) -> Result<Vec<Checkpoint>>;

    /// Append a checkpoint. Appending a `seq` that already exists fails.
    async fn append(&self, task_id: &str, checkpoint: &Checkpoint) -> Result<()>;

    async fn finish_task(&self, task_id: &str) -> Result<()>;

    /// Tasks without `finished_at`, oldest first.
    async fn unfinished_tasks(&self) -> Result<Vec<TaskRecord>>;
}
