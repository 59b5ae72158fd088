//! In-memory collaborators for tests and embedding.
//!
//! Everything lives in `HashMap`s/`Vec`s behind `std::sync` locks. Each
//! trait method takes a single write lock, which makes the conditional
//! slug insert and the tag upsert atomic.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{InsertOutcome, NewPost, Post, PostFilter, Tag};

use super::{BlobStore, Checkpoint, CheckpointStore, KvStore, PostStore, TaskRecord};

fn poisoned() -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

struct StoredPost {
    post: NewPost,
    id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct PostTables {
    posts: Vec<StoredPost>,
    tags: Vec<Tag>,
}

impl PostTables {
    fn hydrate(&self, stored: &StoredPost) -> Post {
        let tags = stored
            .post
            .tag_ids
            .iter()
            .filter_map(|id| self.tags.iter().find(|t| &t.id == id))
            .map(|t| t.name.clone())
            .collect();
        Post {
            id: stored.id.clone(),
            title: stored.post.title.clone(),
            slug: stored.post.slug.clone(),
            summary: stored.post.summary.clone(),
            status: stored.post.status,
            content: stored.post.content.clone(),
            read_time_in_minutes: stored.post.read_time_in_minutes,
            published_at: stored.post.published_at,
            created_at: stored.created_at,
            updated_at: stored.updated_at,
            tags,
        }
    }
}

/// In-memory [`PostStore`].
#[derive(Default)]
pub struct InMemoryPostStore {
    tables: RwLock<PostTables>,
}

impl InMemoryPostStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post_count(&self) -> usize {
        self.tables.read().map(|t| t.posts.len()).unwrap_or(0)
    }
}

#[async_trait]
impl PostStore for InMemoryPostStore {
    async fn list_posts(&self, filter: &PostFilter) -> Result<Vec<Post>> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        let mut posts: Vec<Post> = tables
            .posts
            .iter()
            .map(|p| tables.hydrate(p))
            .filter(|p| filter.matches(p))
            .collect();
        posts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(posts)
    }

    async fn get_post_by_slug(&self, slug: &str) -> Result<Option<Post>> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables
            .posts
            .iter()
            .find(|p| p.post.slug == slug)
            .map(|p| tables.hydrate(p)))
    }

    async fn slug_exists(&self, slug: &str) -> Result<bool> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables.posts.iter().any(|p| p.post.slug == slug))
    }

    async fn insert_post(&self, post: &NewPost) -> Result<InsertOutcome> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        if tables.posts.iter().any(|p| p.post.slug == post.slug) {
            return Ok(InsertOutcome::SlugTaken);
        }
        let now = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();
        tables.posts.push(StoredPost {
            post: post.clone(),
            id: id.clone(),
            created_at: post.created_at.unwrap_or(now),
            updated_at: post.updated_at.unwrap_or(now),
        });
        Ok(InsertOutcome::Inserted(id))
    }

    async fn upsert_tag(&self, name: &str) -> Result<Tag> {
        let name = name.trim();
        if name.is_empty() {
            bail!("tag name must not be empty");
        }
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        if let Some(existing) = tables.tags.iter().find(|t| t.name.eq_ignore_ascii_case(name)) {
            return Ok(existing.clone());
        }
        let tag = Tag {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        tables.tags.push(tag.clone());
        Ok(tag)
    }

    async fn list_tags(&self) -> Result<Vec<Tag>> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        let mut tags = tables.tags.clone();
        tags.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(tags)
    }
}

/// In-memory [`BlobStore`].
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<String, (Vec<u8>, String)>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .blobs
            .read()
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let mut blobs = self.blobs.write().map_err(|_| poisoned())?;
        blobs.insert(key.to_string(), (bytes, content_type.to_string()));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let blobs = self.blobs.read().map_err(|_| poisoned())?;
        Ok(blobs.get(key).map(|(bytes, _)| bytes.clone()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut blobs = self.blobs.write().map_err(|_| poisoned())?;
        blobs.remove(key);
        Ok(())
    }
}

/// In-memory [`KvStore`]; expired entries are dropped on read.
#[derive(Default)]
pub struct InMemoryKvStore {
    entries: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let ttl = chrono::Duration::from_std(ttl)?;
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        entries.insert(key.to_string(), (value.to_string(), Utc::now() + ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        match entries.get(key) {
            Some((_, expires_at)) if *expires_at <= Utc::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }
}

/// In-memory [`CheckpointStore`].
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    tasks: RwLock<BTreeMap<String, TaskRecord>>,
    journal: RwLock<HashMap<String, Vec<Checkpoint>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the last `n` checkpoints of a task, as if their writes were lost.
    pub fn truncate(&self, task_id: &str, n: usize) {
        if let Ok(mut journal) = self.journal.write() {
            if let Some(entries) = journal.get_mut(task_id) {
                let keep = entries.len().saturating_sub(n);
                entries.truncate(keep);
            }
        }
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn create_task(&self, task: &TaskRecord) -> Result<()> {
        let mut tasks = self.tasks.write().map_err(|_| poisoned())?;
        if tasks.contains_key(&task.id) {
            bail!("task {} already exists", task.id);
        }
        tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        let tasks = self.tasks.read().map_err(|_| poisoned())?;
        Ok(tasks.get(task_id).cloned())
    }

    async fn load(&self, task_id: &str) -> Result<Vec<Checkpoint>> {
        let journal = self.journal.read().map_err(|_| poisoned())?;
        Ok(journal.get(task_id).cloned().unwrap_or_default())
    }

    async fn append(&self, task_id: &str, checkpoint: &Checkpoint) -> Result<()> {
        let mut journal = self.journal.write().map_err(|_| poisoned())?;
        let entries = journal.entry(task_id.to_string()).or_default();
        if entries.iter().any(|c| c.seq == checkpoint.seq) {
            bail!("checkpoint {} of task {} already exists", checkpoint.seq, task_id);
        }
        entries.push(checkpoint.clone());
        Ok(())
    }

    async fn finish_task(&self, task_id: &str) -> Result<()> {
        let mut tasks = self.tasks.write().map_err(|_| poisoned())?;
        if let Some(task) = tasks.get_mut(task_id) {
            task.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn unfinished_tasks(&self) -> Result<Vec<TaskRecord>> {
        let tasks = self.tasks.read().map_err(|_| poisoned())?;
        let mut open: Vec<TaskRecord> = tasks
            .values()
            .filter(|t| t.finished_at.is_none())
            .cloned()
            .collect();
        open.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(open)
    }
}
