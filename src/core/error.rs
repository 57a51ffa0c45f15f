//! Engine error taxonomy

use crate::caldb::CalType;
use crate::core::dataset::ProcessingLevel;
use thiserror::Error;

/// Malformed recipe documents. Always fatal, raised before execution.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("recipe document is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("recipe '{0}' declares no steps")]
    EmptySteps(String),

    #[error("step '{step}' requests unknown calibration type '{calib}'")]
    UnknownCalType { step: String, calib: String },

    #[error("step '{step}' keyword '{keyword}' must be a scalar value")]
    NonScalarKeyword { step: String, keyword: String },

    #[error("step '{0}' is not a registered operation or engine step")]
    UnknownStepName(String),
}

/// Checkpoint write failures (retried with bounded backoff before fatal)
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors raised by the pipeline engine during a run
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("unknown step '{0}'")]
    UnknownStep(String),

    #[error("required calibration missing: {0}")]
    RequiredCalibrationMissing(CalType),

    #[error("calibration store error: {0}")]
    CalStore(String),

    #[error("step '{step}' failed: {message}")]
    StepExecution { step: String, message: String },

    #[error("grouping error: {0}")]
    Grouping(String),

    #[error("processing level may only advance, not {from} -> {to}")]
    LevelRegression {
        from: ProcessingLevel,
        to: ProcessingLevel,
    },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("no viable frames remain after per-frame error exclusion")]
    NoViableFrames,

    #[error("run cancelled")]
    Cancelled,
}

impl EngineError {
    /// Short machine-readable kind tag used in structured run reports
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Schema(_) => "schema",
            EngineError::UnknownStep(_) => "unknown_step",
            EngineError::RequiredCalibrationMissing(_) => "required_calibration_missing",
            EngineError::CalStore(_) => "calibration_store",
            EngineError::StepExecution { .. } => "step_execution",
            EngineError::Grouping(_) => "grouping",
            EngineError::LevelRegression { .. } => "level_regression",
            EngineError::Checkpoint(_) => "checkpoint_io",
            EngineError::NoViableFrames => "no_viable_frames",
            EngineError::Cancelled => "cancelled",
        }
    }
}
