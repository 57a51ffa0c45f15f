//! drpipe - a recipe-driven data reduction pipeline engine

pub mod caldb;
pub mod cli;
pub mod core;
pub mod execution;
pub mod steps;

// Re-export commonly used types
pub use crate::caldb::{
    CalArtifact, CalIdAllocator, CalQuery, CalType, CalibrationResolver, CalibrationStore,
    InMemoryCalDb, NewCalArtifact, Resolved,
};
pub use crate::core::{
    DatasetState, DrpConfig, EngineError, Frame, ProcessingLevel, Recipe, RunReport, RunStatus,
    SchemaError, SelectionMode,
};
pub use crate::execution::{DirectorySink, InMemorySink, PipelineRunner, RunEvent, RunOutcome};
pub use crate::steps::{ResolvedCalibs, StepOperation, StepOutput, StepRegistry};
