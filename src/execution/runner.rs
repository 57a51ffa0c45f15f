//! Pipeline runner - drives sequential execution of a recipe's steps

use crate::caldb::CalibrationResolver;
use crate::core::dataset::{DatasetState, RemainderPolicy};
use crate::core::error::EngineError;
use crate::core::recipe::{Recipe, Step};
use crate::core::state::{AbortInfo, FrameError, RunReport, RunStatus, StepStatus};
use crate::execution::checkpoint::{Checkpoint, CheckpointReceipt, CheckpointSink};
use crate::steps::{EngineStep, ResolvedCalibs, StepRegistry};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Checkpoint write retry policy: bounded attempts with exponential backoff
const CHECKPOINT_ATTEMPTS: u32 = 3;
const CHECKPOINT_BACKOFF_MS: u64 = 100;

/// Events emitted during a run
#[derive(Debug, Clone)]
pub enum RunEvent {
    RunStarted {
        run_id: Uuid,
        recipe: String,
    },
    StepStarted {
        index: usize,
        name: String,
    },
    StepCompleted {
        index: usize,
        name: String,
        frames: usize,
    },
    StepFailed {
        index: usize,
        name: String,
        error: String,
    },
    FrameExcluded {
        frame_id: String,
        step: String,
        error: String,
    },
    CheckpointWritten {
        location: String,
        sequence: u32,
    },
    RunFinished {
        run_id: Uuid,
        status: RunStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(RunEvent) + Send + Sync>;

/// Terminal result of a run: the final dataset and checkpoint receipts on
/// completion, or the partial checkpoints plus a structured report on abort.
#[derive(Debug)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub dataset: Option<DatasetState>,
    pub checkpoints: Vec<CheckpointReceipt>,
    pub report: RunReport,
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn is_aborted(&self) -> bool {
        self.status == RunStatus::Aborted
    }
}

/// Drives a recipe's steps in declared order against one dataset.
///
/// State machine: Idle -> Loaded (validation) -> Running -> Completed or
/// Aborted. Fail-fast and per-item error tracking share this control flow,
/// parameterized by the recipe's `track_individual_errors` flag.
pub struct PipelineRunner {
    registry: Arc<StepRegistry>,
    resolver: Arc<CalibrationResolver>,
    sink: Arc<dyn CheckpointSink>,
    handlers: Mutex<Vec<EventHandler>>,
    cancelled: Arc<AtomicBool>,
}

impl PipelineRunner {
    pub fn new(
        registry: Arc<StepRegistry>,
        resolver: Arc<CalibrationResolver>,
        sink: Arc<dyn CheckpointSink>,
    ) -> Self {
        Self {
            registry,
            resolver,
            sink,
            handlers: Mutex::new(Vec::new()),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(RunEvent) + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        handlers.push(Arc::new(handler));
    }

    /// Cooperative cancellation flag, checked at step boundaries. A
    /// cancelled run aborts and discards uncommitted dataset state.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    fn emit(&self, event: RunEvent) {
        let handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }

    /// Execute the recipe against the dataset
    pub async fn run(&self, recipe: &Recipe, dataset: DatasetState) -> RunOutcome {
        let run_id = Uuid::new_v4();
        let mut report = RunReport::new(run_id, &recipe.name);
        let mut checkpoints = Vec::new();

        // Idle -> Loaded: validation errors never reach execution
        if let Err(schema_err) = recipe.validate_steps(&self.registry) {
            let err = EngineError::from(schema_err);
            error!("recipe '{}' failed validation: {}", recipe.name, err);
            return self.abort(report, checkpoints, "<validation>", err, run_id);
        }

        info!("starting run of recipe '{}' ({})", recipe.name, run_id);
        self.emit(RunEvent::RunStarted {
            run_id,
            recipe: recipe.name.clone(),
        });

        let track_individual_errors = recipe.drpconfig.track_individual_errors;
        let mut dataset = dataset;
        let mut checkpoint_seq: u32 = 0;

        for (index, step) in recipe.steps.iter().enumerate() {
            if self.cancelled.load(Ordering::SeqCst) {
                warn!("run {} cancelled before step '{}'", run_id, step.name);
                return self.abort(report, checkpoints, &step.name, EngineError::Cancelled, run_id);
            }

            self.emit(RunEvent::StepStarted {
                index,
                name: step.name.clone(),
            });
            let frames_in = dataset.frames.len();

            let frame_errors = match self
                .execute_step(recipe, index, step, &mut dataset, &mut checkpoint_seq, &mut checkpoints)
                .await
            {
                Ok(frame_errors) => frame_errors,
                Err(err) => {
                    report.record_step(
                        index,
                        &step.name,
                        StepStatus::Failed,
                        Some(err.to_string()),
                        frames_in,
                        dataset.frames.len(),
                    );
                    self.emit(RunEvent::StepFailed {
                        index,
                        name: step.name.clone(),
                        error: err.to_string(),
                    });
                    return self.abort(report, checkpoints, &step.name, err, run_id);
                }
            };

            if !frame_errors.is_empty() {
                if track_individual_errors {
                    // Exclude the offending frames and continue with the rest
                    let ids: Vec<String> =
                        frame_errors.iter().map(|e| e.frame_id.clone()).collect();
                    for fe in &frame_errors {
                        warn!(
                            "excluding frame '{}' after error in '{}': {}",
                            fe.frame_id, fe.step, fe.message
                        );
                        self.emit(RunEvent::FrameExcluded {
                            frame_id: fe.frame_id.clone(),
                            step: fe.step.clone(),
                            error: fe.message.clone(),
                        });
                    }
                    dataset.exclude_frames(&ids);
                    report.frame_errors.extend(frame_errors);

                    if dataset.frames.is_empty() {
                        report.record_step(
                            index,
                            &step.name,
                            StepStatus::Completed,
                            None,
                            frames_in,
                            0,
                        );
                        return self.abort(
                            report,
                            checkpoints,
                            &step.name,
                            EngineError::NoViableFrames,
                            run_id,
                        );
                    }
                } else {
                    let first = &frame_errors[0];
                    let err = EngineError::StepExecution {
                        step: step.name.clone(),
                        message: format!("frame '{}': {}", first.frame_id, first.message),
                    };
                    report.frame_errors.extend(frame_errors);
                    report.record_step(
                        index,
                        &step.name,
                        StepStatus::Failed,
                        Some(err.to_string()),
                        frames_in,
                        dataset.frames.len(),
                    );
                    self.emit(RunEvent::StepFailed {
                        index,
                        name: step.name.clone(),
                        error: err.to_string(),
                    });
                    return self.abort(report, checkpoints, &step.name, err, run_id);
                }
            }

            report.record_step(
                index,
                &step.name,
                StepStatus::Completed,
                None,
                frames_in,
                dataset.frames.len(),
            );
            self.emit(RunEvent::StepCompleted {
                index,
                name: step.name.clone(),
                frames: dataset.frames.len(),
            });
        }

        info!("run {} of '{}' completed", run_id, recipe.name);
        report.finished_at = Some(Utc::now());
        self.emit(RunEvent::RunFinished {
            run_id,
            status: RunStatus::Completed,
        });
        RunOutcome {
            status: RunStatus::Completed,
            dataset: Some(dataset),
            checkpoints,
            report,
        }
    }

    /// Run one step: engine steps are interpreted here, everything else is
    /// dispatched through the registry after calibration resolution.
    /// Returns the step's frame-attributable errors.
    async fn execute_step(
        &self,
        recipe: &Recipe,
        index: usize,
        step: &Step,
        dataset: &mut DatasetState,
        checkpoint_seq: &mut u32,
        checkpoints: &mut Vec<CheckpointReceipt>,
    ) -> Result<Vec<FrameError>, EngineError> {
        match EngineStep::classify(&step.name) {
            Some(EngineStep::Save) => {
                *checkpoint_seq += 1;
                let checkpoint = Checkpoint::of(&recipe.name, *checkpoint_seq, dataset);
                let receipt = self.write_with_retry(recipe, &checkpoint).await?;
                self.emit(RunEvent::CheckpointWritten {
                    location: receipt.location.clone(),
                    sequence: receipt.sequence,
                });
                checkpoints.push(receipt);
                Ok(Vec::new())
            }
            Some(EngineStep::UpdateTo(level)) => {
                dataset.advance_to(level)?;
                info!("dataset advanced to {}", level);
                Ok(Vec::new())
            }
            Some(EngineStep::CombineSubexposures) => {
                let group_size = step.keyword_usize("num_frames_per_group").ok_or_else(|| {
                    EngineError::Grouping(
                        "combine_subexposures requires keyword 'num_frames_per_group'".to_string(),
                    )
                })?;
                let remainder = match step.keyword_str("remainder") {
                    Some(s) => RemainderPolicy::parse(s).map_err(EngineError::Grouping)?,
                    None => RemainderPolicy::default(),
                };
                dataset.combine_subexposures(group_size, remainder)?;
                Ok(Vec::new())
            }
            None => {
                let op = self.registry.lookup(&step.name)?;

                // Resolution happens-before execution, in declared order
                let mut resolved = ResolvedCalibs::new();
                for (cal_type, mode) in &step.calibs {
                    let outcome = self.resolver.resolve(*cal_type, mode, dataset).await?;
                    resolved.insert(*cal_type, outcome);
                }

                let output = op
                    .execute(dataset.clone(), &resolved, &step.keywords)
                    .map_err(|e| EngineError::StepExecution {
                        step: step.name.clone(),
                        message: e.to_string(),
                    })?;
                *dataset = output.dataset;

                if let Some(new_artifact) = output.produced {
                    if let Some(registered) = self
                        .resolver
                        .register_produced(new_artifact, &recipe.name, index)
                        .await?
                    {
                        info!(
                            "step '{}' registered calibration '{}'",
                            step.name, registered.id
                        );
                    }
                }

                Ok(output.frame_errors)
            }
        }
    }

    async fn write_with_retry(
        &self,
        recipe: &Recipe,
        checkpoint: &Checkpoint,
    ) -> Result<CheckpointReceipt, EngineError> {
        let mut attempt: u32 = 0;
        loop {
            match self.sink.write(&recipe.outputdir, checkpoint).await {
                Ok(receipt) => return Ok(receipt),
                Err(err) if attempt + 1 < CHECKPOINT_ATTEMPTS => {
                    let backoff = Duration::from_millis(CHECKPOINT_BACKOFF_MS << attempt);
                    warn!(
                        "checkpoint write failed (attempt {}/{}): {}; retrying in {:?}",
                        attempt + 1,
                        CHECKPOINT_ATTEMPTS,
                        err,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn abort(
        &self,
        mut report: RunReport,
        checkpoints: Vec<CheckpointReceipt>,
        step: &str,
        err: EngineError,
        run_id: Uuid,
    ) -> RunOutcome {
        error!("run {} aborted at '{}': {}", run_id, step, err);
        report.abort = Some(AbortInfo {
            step: step.to_string(),
            kind: err.kind().to_string(),
            message: err.to_string(),
        });
        report.finished_at = Some(Utc::now());
        self.emit(RunEvent::RunFinished {
            run_id,
            status: RunStatus::Aborted,
        });
        RunOutcome {
            status: RunStatus::Aborted,
            dataset: None,
            checkpoints,
            report,
        }
    }
}
