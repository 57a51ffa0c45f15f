//! Core domain models for the reduction engine
//!
//! Contains the recipe schema, the working dataset, run state and the error
//! taxonomy.

pub mod dataset;
pub mod error;
pub mod recipe;
pub mod state;

pub use dataset::{DatasetState, Frame, ProcessingLevel, RemainderPolicy};
pub use error::{CheckpointError, EngineError, SchemaError};
pub use recipe::{DrpConfig, Keywords, Recipe, SelectionMode, Step};
pub use state::{AbortInfo, FrameError, RunReport, RunStatus, StepRecord, StepStatus};
