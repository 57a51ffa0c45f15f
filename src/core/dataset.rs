//! Working dataset threaded through a pipeline run

use crate::core::error::EngineError;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Processing level of a dataset. Advances monotonically via the
/// `update_to_<level>` engine steps and never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProcessingLevel {
    L1,
    L2a,
    L2b,
}

impl ProcessingLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingLevel::L1 => "L1",
            ProcessingLevel::L2a => "L2a",
            ProcessingLevel::L2b => "L2b",
        }
    }
}

impl fmt::Display for ProcessingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "l1" => Ok(ProcessingLevel::L1),
            "l2a" => Ok(ProcessingLevel::L2a),
            "l2b" => Ok(ProcessingLevel::L2b),
            other => Err(format!("unknown processing level '{}'", other)),
        }
    }
}

/// A single exposure frame. Opaque to the engine beyond the metadata it
/// exposes for calibration resolution and its position in the frame sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// Stable frame identifier (derived from the input reference, not random,
    /// so that re-runs over the same inputs are reproducible)
    pub id: String,

    /// Acquisition timestamp
    pub acquired_at: DateTime<Utc>,

    /// Detector observing mode at acquisition
    pub observing_mode: String,

    /// Exposure time in seconds
    pub exptime_s: f64,

    /// Free-form frame metadata (header-derived values, unit labels, flags)
    #[serde(default)]
    pub metadata: HashMap<String, Value>,

    /// Names of the operations applied to this frame, in order
    #[serde(default)]
    pub history: Vec<String>,
}

impl Frame {
    pub fn new(id: impl Into<String>, acquired_at: DateTime<Utc>, observing_mode: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            acquired_at,
            observing_mode: observing_mode.into(),
            exptime_s: 0.0,
            metadata: HashMap::new(),
            history: Vec::new(),
        }
    }

    /// Record an applied operation in the frame history
    pub fn record(&mut self, op: &str) {
        self.history.push(op.to_string());
    }

    /// Set a metadata key
    pub fn set_meta(&mut self, key: &str, value: Value) {
        self.metadata.insert(key.to_string(), value);
    }

    /// Read a boolean metadata flag, defaulting to false
    pub fn flag(&self, key: &str) -> bool {
        self.metadata.get(key).and_then(Value::as_bool).unwrap_or(false)
    }
}

/// Remainder policy for `combine_subexposures` when the frame count is not
/// evenly divisible by the group size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemainderPolicy {
    /// Fail with a grouping error (default)
    #[default]
    Error,
    /// Drop the trailing partial group
    Drop,
    /// Combine the trailing partial group as-is
    Keep,
}

impl RemainderPolicy {
    pub fn parse(s: &str) -> Result<Self, String> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(RemainderPolicy::Error),
            "drop" => Ok(RemainderPolicy::Drop),
            "keep" => Ok(RemainderPolicy::Keep),
            other => Err(format!("unknown remainder policy '{}'", other)),
        }
    }
}

/// The mutable working data threaded through a run: an ordered frame
/// collection plus a processing-level tag and dataset-wide metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetState {
    pub frames: Vec<Frame>,
    pub level: ProcessingLevel,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl DatasetState {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames,
            level: ProcessingLevel::L1,
            metadata: HashMap::new(),
        }
    }

    /// Build a dataset from recipe input references. Header parsing is an
    /// external concern, so frames get synthetic acquisition timestamps
    /// spaced a minute apart from a fixed epoch (deterministic across runs).
    pub fn from_inputs(inputs: &[String]) -> Self {
        let epoch = Utc.timestamp_opt(0, 0).single().unwrap_or_else(Utc::now);
        let frames = inputs
            .iter()
            .enumerate()
            .map(|(idx, input)| {
                let stem = input
                    .rsplit('/')
                    .next()
                    .and_then(|name| name.split('.').next())
                    .unwrap_or(input);
                let mut frame = Frame::new(stem, epoch + chrono::Duration::minutes(idx as i64), "default");
                frame.set_meta("source", Value::String(input.clone()));
                frame
            })
            .collect();
        Self::new(frames)
    }

    /// Earliest frame acquisition time, used as the reference timestamp for
    /// calibration validity matching.
    pub fn reference_timestamp(&self) -> Option<DateTime<Utc>> {
        self.frames.iter().map(|f| f.acquired_at).min()
    }

    /// Observing mode of the dataset (frames within one dataset share a mode)
    pub fn observing_mode(&self) -> Option<&str> {
        self.frames.first().map(|f| f.observing_mode.as_str())
    }

    /// Advance the processing level. The target must strictly advance the
    /// current level; repeating a transition or moving backwards is rejected.
    pub fn advance_to(&mut self, target: ProcessingLevel) -> Result<(), EngineError> {
        if target <= self.level {
            return Err(EngineError::LevelRegression {
                from: self.level,
                to: target,
            });
        }
        self.level = target;
        Ok(())
    }

    /// Partition frames into contiguous groups of `group_size` and replace
    /// each group with a single combined frame. The combined frame takes the
    /// first member's acquisition time and mode, sums exposure times, and
    /// records the combination in its history.
    pub fn combine_subexposures(
        &mut self,
        group_size: usize,
        remainder: RemainderPolicy,
    ) -> Result<(), EngineError> {
        if group_size == 0 {
            return Err(EngineError::Grouping("group size must be at least 1".to_string()));
        }

        let count = self.frames.len();
        if count % group_size != 0 && remainder == RemainderPolicy::Error {
            return Err(EngineError::Grouping(format!(
                "{} frames cannot be split into groups of {}",
                count, group_size
            )));
        }

        let frames = std::mem::take(&mut self.frames);
        let mut combined = Vec::with_capacity(count / group_size + 1);

        for (group_idx, group) in frames.chunks(group_size).enumerate() {
            if group.len() < group_size && remainder == RemainderPolicy::Drop {
                continue;
            }

            let first = &group[0];
            let mut frame = Frame::new(
                format!("{}_comb{:03}", first.id, group_idx),
                first.acquired_at,
                first.observing_mode.clone(),
            );
            frame.exptime_s = group.iter().map(|f| f.exptime_s).sum();
            frame.history = first.history.clone();
            frame.record("combine_subexposures");
            frame.set_meta("num_combined", Value::from(group.len()));
            combined.push(frame);
        }

        self.frames = combined;
        Ok(())
    }

    /// Remove the given frames from the dataset (per-frame error exclusion)
    pub fn exclude_frames(&mut self, frame_ids: &[String]) {
        self.frames.retain(|f| !frame_ids.iter().any(|id| id == &f.id));
    }

    /// Deterministic digest over frame identities and histories. Used to
    /// derive stable calibration identifiers for artifacts produced mid-run.
    pub fn content_digest(&self) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(self.level.as_str().as_bytes());
        for frame in &self.frames {
            hasher.update(frame.id.as_bytes());
            hasher.update(frame.acquired_at.timestamp().to_le_bytes());
            for op in &frame.history {
                hasher.update(op.as_bytes());
            }
        }
        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }
}
