//! Step registry and the operation contract

pub mod builtin;

use crate::caldb::{CalArtifact, CalType, NewCalArtifact, Resolved};
use crate::core::dataset::{DatasetState, Frame, ProcessingLevel};
use crate::core::error::EngineError;
use crate::core::recipe::Keywords;
use crate::core::state::FrameError;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Step names the runner interprets itself instead of dispatching through
/// the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStep {
    /// Checkpoint the current dataset; no data transform
    Save,
    /// Strictly advance the dataset's processing level
    UpdateTo(ProcessingLevel),
    /// Replace contiguous frame groups with combined frames
    CombineSubexposures,
}

impl EngineStep {
    pub fn classify(name: &str) -> Option<EngineStep> {
        if name == "save" {
            return Some(EngineStep::Save);
        }
        if name == "combine_subexposures" {
            return Some(EngineStep::CombineSubexposures);
        }
        if let Some(suffix) = name.strip_prefix("update_to_") {
            return ProcessingLevel::from_str(suffix).ok().map(EngineStep::UpdateTo);
        }
        None
    }
}

/// The calibration envelope handed to every operation. Operations may ignore
/// entries they do not need.
#[derive(Debug, Clone, Default)]
pub struct ResolvedCalibs {
    entries: BTreeMap<CalType, Resolved>,
}

impl ResolvedCalibs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, cal_type: CalType, resolved: Resolved) {
        self.entries.insert(cal_type, resolved);
    }

    pub fn get(&self, cal_type: CalType) -> Option<&Resolved> {
        self.entries.get(&cal_type)
    }

    /// The selected artifact for a type, if one was resolved. Absence tokens
    /// and literals yield `None`.
    pub fn artifact(&self, cal_type: CalType) -> Option<&CalArtifact> {
        self.entries.get(&cal_type).and_then(Resolved::artifact)
    }

    pub fn literal(&self, cal_type: CalType) -> Option<&serde_json::Value> {
        match self.entries.get(&cal_type) {
            Some(Resolved::Literal(v)) => Some(v),
            _ => None,
        }
    }
}

/// Global (non-frame-attributable) failure inside an operation
#[derive(Debug, Error)]
#[error("{0}")]
pub struct StepError(pub String);

impl StepError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// What an operation hands back to the runner
#[derive(Debug)]
pub struct StepOutput {
    pub dataset: DatasetState,

    /// Errors attributable to single frames. Under per-item tracking the
    /// runner excludes these frames and continues; otherwise they abort.
    pub frame_errors: Vec<FrameError>,

    /// A calibration artifact this step created, to be registered by the
    /// engine (identifier assignment depends on the `jit_calib_id` flag)
    pub produced: Option<NewCalArtifact>,
}

impl StepOutput {
    /// An output with no errors and no produced artifact
    pub fn clean(dataset: DatasetState) -> Self {
        Self {
            dataset,
            frame_errors: Vec::new(),
            produced: None,
        }
    }
}

/// The fixed capability contract every registered operation exposes:
/// dataset in, transformed dataset out, with resolved calibrations and
/// keyword overrides supplied by the engine.
pub trait StepOperation: Send + Sync {
    fn execute(
        &self,
        dataset: DatasetState,
        calibs: &ResolvedCalibs,
        keywords: &Keywords,
    ) -> Result<StepOutput, StepError>;
}

impl std::fmt::Debug for dyn StepOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StepOperation")
    }
}

/// Lookup from step name to operation. Populated once at startup and
/// read-only during execution.
pub struct StepRegistry {
    ops: HashMap<String, Arc<dyn StepOperation>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self {
            ops: HashMap::new(),
        }
    }

    /// Registry pre-populated with the built-in reduction operations
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_builtins(&mut registry);
        registry
    }

    pub fn register(&mut self, name: &str, op: Arc<dyn StepOperation>) {
        self.ops.insert(name.to_string(), op);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ops.contains_key(name)
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn StepOperation>, EngineError> {
        self.ops
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownStep(name.to_string()))
    }

    /// Registered operation names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.ops.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply a fallible transform to every frame, collecting per-frame errors
/// instead of failing the whole step. Frames that fail stay in the dataset;
/// the runner decides whether to exclude them or abort.
pub fn apply_per_frame<F>(
    mut dataset: DatasetState,
    step_name: &str,
    mut transform: F,
) -> StepOutput
where
    F: FnMut(&mut Frame) -> Result<(), String>,
{
    let mut frame_errors = Vec::new();
    for frame in &mut dataset.frames {
        match transform(frame) {
            Ok(()) => frame.record(step_name),
            Err(message) => frame_errors.push(FrameError {
                frame_id: frame.id.clone(),
                step: step_name.to_string(),
                message,
            }),
        }
    }
    StepOutput {
        dataset,
        frame_errors,
        produced: None,
    }
}
