//! SQLite-backed storage collaborators.
//!
//! One [`SqliteStore`] implements [`PostStore`], [`KvStore`], and
//! [`CheckpointStore`] over the schema created by [`crate::migrate`].
//! Timestamps are stored as Unix seconds.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use blogport_core::document::Node;
use blogport_core::frontmatter::PostStatus;
use blogport_core::models::{InsertOutcome, NewPost, Post, PostFilter, Tag, TaskKind};
use blogport_core::store::{
    Checkpoint, CheckpointStore, KvStore, PostStore, StepOutcome, TaskRecord,
};

/// SQLite implementation of the pipeline's relational collaborators.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn tag_names(&self, post_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT t.name FROM post_tags pt
            JOIN tags t ON t.id = pt.tag_id
            WHERE pt.post_id = ?
            ORDER BY pt.position
            "#,
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| r.get::<String, _>("name")).collect())
    }

    async fn hydrate(&self, row: &SqliteRow) -> Result<Post> {
        let id: String = row.get("id");
        let status: String = row.get("status");
        let content_json: String = row.get("content_json");
        let content: Node = serde_json::from_str(&content_json)
            .with_context(|| format!("Invalid content_json for post {}", id))?;
        let read_time: i64 = row.get("read_time_minutes");
        Ok(Post {
            tags: self.tag_names(&id).await?,
            title: row.get("title"),
            slug: row.get("slug"),
            summary: row.get("summary"),
            status: status.parse().unwrap_or_default(),
            content,
            read_time_in_minutes: u32::try_from(read_time).unwrap_or(1).max(1),
            published_at: row
                .get::<Option<i64>, _>("published_at")
                .and_then(from_ts),
            created_at: from_ts(row.get("created_at")).unwrap_or_else(Utc::now),
            updated_at: from_ts(row.get("updated_at")).unwrap_or_else(Utc::now),
            id,
        })
    }
}

fn from_ts(ts: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
}

const POST_COLUMNS: &str = "id, title, slug, summary, status, content_json, read_time_minutes, \
                            published_at, created_at, updated_at";

#[async_trait]
impl PostStore for SqliteStore {
    async fn list_posts(&self, filter: &PostFilter) -> Result<Vec<Post>> {
        let sql = format!(
            "SELECT {} FROM posts WHERE (? IS NULL OR status = ?) ORDER BY created_at, id",
            POST_COLUMNS
        );
        let status = filter.status.map(|s| s.as_str());
        let rows = sqlx::query(&sql)
            .bind(status)
            .bind(status)
            .fetch_all(&self.pool)
            .await?;

        let mut posts = Vec::with_capacity(rows.len());
        for row in &rows {
            let post = self.hydrate(row).await?;
            if filter.matches(&post) {
                posts.push(post);
            }
        }
        Ok(posts)
    }

    async fn get_post_by_slug(&self, slug: &str) -> Result<Option<Post>> {
        let sql = format!("SELECT {} FROM posts WHERE slug = ?", POST_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(self.hydrate(&row).await?)),
            None => Ok(None),
        }
    }

    async fn slug_exists(&self, slug: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM posts WHERE slug = ?")
            .bind(slug)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn insert_post(&self, post: &NewPost) -> Result<InsertOutcome> {
        let now = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();
        let content_json = serde_json::to_string(&post.content)?;

        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO posts (id, title, slug, summary, status, content_json,
                               read_time_minutes, published_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(slug) DO NOTHING
            "#,
        )
        .bind(&id)
        .bind(&post.title)
        .bind(&post.slug)
        .bind(&post.summary)
        .bind(post.status.as_str())
        .bind(&content_json)
        .bind(i64::from(post.read_time_in_minutes))
        .bind(post.published_at.map(|t| t.timestamp()))
        .bind(post.created_at.unwrap_or(now).timestamp())
        .bind(post.updated_at.unwrap_or(now).timestamp())
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(InsertOutcome::SlugTaken);
        }

        for (position, tag_id) in post.tag_ids.iter().enumerate() {
            sqlx::query(
                "INSERT OR IGNORE INTO post_tags (post_id, tag_id, position) VALUES (?, ?, ?)",
            )
            .bind(&id)
            .bind(tag_id)
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(InsertOutcome::Inserted(id))
    }

    async fn upsert_tag(&self, name: &str) -> Result<Tag> {
        let name = name.trim();
        if name.is_empty() {
            anyhow::bail!("tag name must not be empty");
        }
        sqlx::query("INSERT INTO tags (id, name, created_at) VALUES (?, ?, ?) ON CONFLICT(name) DO NOTHING")
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(name)
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;

        let row = sqlx::query("SELECT id, name, created_at FROM tags WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(Tag {
            id: row.get("id"),
            name: row.get("name"),
            created_at: from_ts(row.get("created_at")).unwrap_or_else(Utc::now),
        })
    }

    async fn list_tags(&self) -> Result<Vec<Tag>> {
        let rows = sqlx::query("SELECT id, name, created_at FROM tags ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| Tag {
                id: row.get("id"),
                name: row.get("name"),
                created_at: from_ts(row.get("created_at")).unwrap_or_else(Utc::now),
            })
            .collect())
    }
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let now = Utc::now().timestamp();
        let expires_at = now.saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX));

        sqlx::query("DELETE FROM kv WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO kv (key, value, expires_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM kv WHERE key = ? AND expires_at > ?")
                .bind(key)
                .bind(Utc::now().timestamp())
                .fetch_optional(&self.pool)
                .await?;
        Ok(value)
    }
}

fn task_from_row(row: &SqliteRow) -> Result<TaskRecord> {
    let kind: String = row.get("kind");
    let params_json: String = row.get("params_json");
    Ok(TaskRecord {
        id: row.get("id"),
        kind: kind.parse::<TaskKind>().map_err(anyhow::Error::msg)?,
        params: serde_json::from_str(&params_json)?,
        created_at: from_ts(row.get("created_at")).unwrap_or_else(Utc::now),
        finished_at: row.get::<Option<i64>, _>("finished_at").and_then(from_ts),
    })
}

#[async_trait]
impl CheckpointStore for SqliteStore {
    async fn create_task(&self, task: &TaskRecord) -> Result<()> {
        sqlx::query("INSERT INTO tasks (id, kind, params_json, created_at) VALUES (?, ?, ?, ?)")
            .bind(&task.id)
            .bind(task.kind.as_str())
            .bind(serde_json::to_string(&task.params)?)
            .bind(task.created_at.timestamp())
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to journal task {}", task.id))?;
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        let row = sqlx::query(
            "SELECT id, kind, params_json, created_at, finished_at FROM tasks WHERE id = ?",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn load(&self, task_id: &str) -> Result<Vec<Checkpoint>> {
        let rows = sqlx::query(
            "SELECT seq, step, outcome_json FROM checkpoints WHERE task_id = ? ORDER BY seq",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<Checkpoint> {
                let seq: i64 = row.get("seq");
                let outcome_json: String = row.get("outcome_json");
                Ok(Checkpoint {
                    seq: u64::try_from(seq)?,
                    step: row.get("step"),
                    outcome: serde_json::from_str::<StepOutcome>(&outcome_json)?,
                })
            })
            .collect()
    }

    async fn append(&self, task_id: &str, checkpoint: &Checkpoint) -> Result<()> {
        sqlx::query("INSERT INTO checkpoints (task_id, seq, step, outcome_json) VALUES (?, ?, ?, ?)")
            .bind(task_id)
            .bind(i64::try_from(checkpoint.seq)?)
            .bind(&checkpoint.step)
            .bind(serde_json::to_string(&checkpoint.outcome)?)
            .execute(&self.pool)
            .await
            .with_context(|| {
                format!(
                    "Failed to append checkpoint {} ({}) for task {}",
                    checkpoint.seq, checkpoint.step, task_id
                )
            })?;
        Ok(())
    }

    async fn finish_task(&self, task_id: &str) -> Result<()> {
        sqlx::query("UPDATE tasks SET finished_at = ? WHERE id = ? AND finished_at IS NULL")
            .bind(Utc::now().timestamp())
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn unfinished_tasks(&self) -> Result<Vec<TaskRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, kind, params_json, created_at, finished_at FROM tasks
            WHERE finished_at IS NULL
            ORDER BY created_at, rowid
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_from_row).collect()
    }
}
