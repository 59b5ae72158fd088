//! Durable step execution.
//!
//! A task is a sequence of named steps. Every step's result is appended to
//! the task's checkpoint journal before the workflow moves on. When a task
//! is re-driven after a restart, [`StepRunner`] hands back the journalled
//! results in order instead of running the step bodies again, then
//! continues live from the first step without a checkpoint.
//!
//! Step results must be plain serializable data. Bytes (archives, images)
//! are never journalled; steps re-fetch them from the blob store.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use blogport_core::store::{Checkpoint, CheckpointStore, StepOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    /// The step body failed, now or in the journalled run being replayed.
    #[error("{0}")]
    Failed(String),
    /// The workflow asked for a different step than the journal recorded.
    #[error("checkpoint {seq} diverged: journal has step {found:?}, workflow expected {expected:?}")]
    Diverged {
        seq: u64,
        expected: String,
        found: String,
    },
}

/// Runs the steps of one task against its journal.
pub struct StepRunner {
    task_id: String,
    journal: Arc<dyn CheckpointStore>,
    replay: VecDeque<Checkpoint>,
    next_seq: u64,
}

impl StepRunner {
    /// Load the task's journal; every existing checkpoint will be replayed.
    pub async fn open(task_id: &str, journal: Arc<dyn CheckpointStore>) -> anyhow::Result<Self> {
        let checkpoints = journal.load(task_id).await?;
        if !checkpoints.is_empty() {
            debug!(task_id, checkpoints = checkpoints.len(), "replaying task journal");
        }
        Ok(Self {
            task_id: task_id.to_string(),
            journal,
            replay: checkpoints.into(),
            next_seq: 0,
        })
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Whether the next step will be served from the journal.
    pub fn is_replaying(&self) -> bool {
        !self.replay.is_empty()
    }

    /// Run (or replay) the step called `name`.
    ///
    /// On replay the stored outcome is returned without calling `body`: a
    /// journalled success is deserialized, a journalled failure is raised
    /// again. Live runs journal the outcome, success or failure, before
    /// returning it.
    pub async fn step<T, F, Fut>(&mut self, name: &str, body: F) -> Result<T, StepError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if let Some(checkpoint) = self.replay.pop_front() {
            if checkpoint.step != name {
                return Err(StepError::Diverged {
                    seq: checkpoint.seq,
                    expected: name.to_string(),
                    found: checkpoint.step,
                });
            }
            self.next_seq = checkpoint.seq + 1;
            debug!(task_id = %self.task_id, step = name, seq = checkpoint.seq, "replayed step");
            return match checkpoint.outcome {
                StepOutcome::Ok(value) => serde_json::from_value(value).map_err(|e| {
                    StepError::Failed(format!("journalled result of {} is unreadable: {}", name, e))
                }),
                StepOutcome::Err(message) => Err(StepError::Failed(message)),
            };
        }

        let (outcome, result) = match body().await {
            Ok(value) => match serde_json::to_value(&value) {
                Ok(json) => (StepOutcome::Ok(json), Ok(value)),
                Err(e) => {
                    let message = format!("result of {} is not serializable: {}", name, e);
                    (StepOutcome::Err(message.clone()), Err(StepError::Failed(message)))
                }
            },
            Err(e) => {
                let message = format!("{:#}", e);
                (StepOutcome::Err(message.clone()), Err(StepError::Failed(message)))
            }
        };

        let checkpoint = Checkpoint {
            seq: self.next_seq,
            step: name.to_string(),
            outcome,
        };
        self.journal
            .append(&self.task_id, &checkpoint)
            .await
            .map_err(|e| StepError::Failed(format!("journal write failed: {:#}", e)))?;
        self.next_seq += 1;
        result
    }

    /// Durable sleep. The wake-up time is journalled on first run; a replay
    /// sleeps only for whatever remains of it.
    pub async fn sleep_until(&mut self, name: &str, wake_at: DateTime<Utc>) -> Result<(), StepError> {
        let wake_at: DateTime<Utc> = self.step(name, || async move { Ok(wake_at) }).await?;
        let remaining = wake_at - Utc::now();
        if let Ok(remaining) = remaining.to_std() {
            debug!(task_id = %self.task_id, step = name, ?remaining, "sleeping");
            tokio::time::sleep(remaining).await;
        }
        Ok(())
    }
}
