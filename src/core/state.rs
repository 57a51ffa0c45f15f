//! Run state machine and structured report types

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Lifecycle of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    /// No recipe loaded yet
    Idle,
    /// Recipe validated, execution not started
    Loaded,
    /// Steps are being executed in declared order
    Running,
    /// All steps finished without a fatal error
    Completed,
    /// A fatal error ended the run
    Aborted,
}

/// Terminal status of one executed step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StepStatus {
    Completed,
    Failed,
}

/// One step's entry in the run report
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub index: usize,
    pub name: String,
    pub status: StepStatus,
    /// Error message for failed steps
    pub error: Option<String>,
    pub frames_in: usize,
    pub frames_out: usize,
}

/// An error attributed to a single frame under per-item tracking
#[derive(Debug, Clone, Serialize)]
pub struct FrameError {
    pub frame_id: String,
    pub step: String,
    pub message: String,
}

/// Details of a fatal abort
#[derive(Debug, Clone, Serialize)]
pub struct AbortInfo {
    pub step: String,
    pub kind: String,
    pub message: String,
}

/// Structured report surfaced with every run outcome. Aborts preserve the
/// records of everything that ran before the failure.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub recipe: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepRecord>,
    pub frame_errors: Vec<FrameError>,
    pub abort: Option<AbortInfo>,
}

impl RunReport {
    pub fn new(run_id: Uuid, recipe: &str) -> Self {
        Self {
            run_id,
            recipe: recipe.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            steps: Vec::new(),
            frame_errors: Vec::new(),
            abort: None,
        }
    }

    pub fn record_step(
        &mut self,
        index: usize,
        name: &str,
        status: StepStatus,
        error: Option<String>,
        frames_in: usize,
        frames_out: usize,
    ) {
        self.steps.push(StepRecord {
            index,
            name: name.to_string(),
            status,
            error,
            frames_in,
            frames_out,
        });
    }

    /// Names of the executed steps, in execution order
    pub fn executed_steps(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }
}
