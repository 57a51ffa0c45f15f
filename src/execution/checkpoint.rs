//! Checkpoint snapshots and sinks

use crate::core::dataset::{DatasetState, Frame, ProcessingLevel};
use crate::core::error::CheckpointError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Immutable snapshot of the dataset at a `save` step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub recipe: String,

    /// Position of this checkpoint within the run (distinct per `save`)
    pub sequence: u32,

    pub level: ProcessingLevel,
    pub frames: Vec<Frame>,
    pub written_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn of(recipe: &str, sequence: u32, dataset: &DatasetState) -> Self {
        Self {
            recipe: recipe.to_string(),
            sequence,
            level: dataset.level,
            frames: dataset.frames.clone(),
            written_at: Utc::now(),
        }
    }

    /// Filename stem for directory-backed sinks
    pub fn label(&self) -> String {
        format!("{}_{:03}_{}", self.recipe, self.sequence, self.level)
    }
}

/// Receipt for a written checkpoint, surfaced in the run outcome
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointReceipt {
    /// Where the checkpoint landed (path or key)
    pub location: String,
    pub sequence: u32,
    pub level: ProcessingLevel,
    pub frame_count: usize,
    pub written_at: DateTime<Utc>,
}

/// Checkpoint sink collaborator; owns the persistence format
#[async_trait]
pub trait CheckpointSink: Send + Sync {
    async fn write(
        &self,
        output_dir: &Path,
        checkpoint: &Checkpoint,
    ) -> Result<CheckpointReceipt, CheckpointError>;
}

/// Writes checkpoints as pretty-printed JSON files under the recipe's output
/// directory.
pub struct DirectorySink;

#[async_trait]
impl CheckpointSink for DirectorySink {
    async fn write(
        &self,
        output_dir: &Path,
        checkpoint: &Checkpoint,
    ) -> Result<CheckpointReceipt, CheckpointError> {
        tokio::fs::create_dir_all(output_dir).await?;
        let path = output_dir.join(format!("{}.json", checkpoint.label()));
        let bytes = serde_json::to_vec_pretty(checkpoint)?;
        tokio::fs::write(&path, bytes).await?;
        Ok(CheckpointReceipt {
            location: path.display().to_string(),
            sequence: checkpoint.sequence,
            level: checkpoint.level,
            frame_count: checkpoint.frames.len(),
            written_at: checkpoint.written_at,
        })
    }
}

/// In-memory sink for tests and ephemeral runs. Can be primed to fail the
/// first N writes to exercise the runner's bounded retry.
pub struct InMemorySink {
    written: tokio::sync::RwLock<Vec<Checkpoint>>,
    fail_next: AtomicUsize,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self {
            written: tokio::sync::RwLock::new(Vec::new()),
            fail_next: AtomicUsize::new(0),
        }
    }

    /// Make the next `n` writes fail with an i/o error
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub async fn written(&self) -> Vec<Checkpoint> {
        self.written.read().await.clone()
    }
}

impl Default for InMemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointSink for InMemorySink {
    async fn write(
        &self,
        _output_dir: &Path,
        checkpoint: &Checkpoint,
    ) -> Result<CheckpointReceipt, CheckpointError> {
        let remaining = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if remaining {
            return Err(CheckpointError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected checkpoint write failure",
            )));
        }

        let mut written = self.written.write().await;
        written.push(checkpoint.clone());
        Ok(CheckpointReceipt {
            location: format!("mem://{}", checkpoint.label()),
            sequence: checkpoint.sequence,
            level: checkpoint.level,
            frame_count: checkpoint.frames.len(),
            written_at: checkpoint.written_at,
        })
    }
}
