//! Execution engine: the sequential runner and checkpoint sinks

pub mod checkpoint;
pub mod runner;

pub use checkpoint::{Checkpoint, CheckpointReceipt, CheckpointSink, DirectorySink, InMemorySink};
pub use runner::{EventHandler, PipelineRunner, RunEvent, RunOutcome};
