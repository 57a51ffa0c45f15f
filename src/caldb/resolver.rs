//! Calibration selection against the store

use crate::caldb::{
    CalArtifact, CalIdAllocator, CalQuery, CalType, CalibrationStore, NewCalArtifact,
};
use crate::core::dataset::DatasetState;
use crate::core::error::EngineError;
use crate::core::recipe::SelectionMode;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of resolving one calibration requirement
#[derive(Debug, Clone)]
pub enum Resolved {
    /// A concrete artifact selected from the store
    Artifact(CalArtifact),
    /// Explicit-absence token for tolerated-absent requirements; the step
    /// receives no artifact of that type and must handle it gracefully
    Absent,
    /// Literal value supplied directly by the recipe, no resolution needed
    Literal(Value),
}

impl Resolved {
    pub fn artifact(&self) -> Option<&CalArtifact> {
        match self {
            Resolved::Artifact(a) => Some(a),
            _ => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Resolved::Absent)
    }
}

/// Resolves a step's declared calibration requirements against the store and
/// registers artifacts produced mid-run.
pub struct CalibrationResolver {
    store: Arc<dyn CalibrationStore>,
    allocator: Arc<CalIdAllocator>,
    jit_calib_id: bool,
}

impl CalibrationResolver {
    pub fn new(
        store: Arc<dyn CalibrationStore>,
        allocator: Arc<CalIdAllocator>,
        jit_calib_id: bool,
    ) -> Self {
        Self {
            store,
            allocator,
            jit_calib_id,
        }
    }

    /// Resolve one `(CalType, SelectionMode)` requirement for the dataset
    pub async fn resolve(
        &self,
        cal_type: CalType,
        mode: &SelectionMode,
        dataset: &DatasetState,
    ) -> Result<Resolved, EngineError> {
        if let SelectionMode::Explicit(value) = mode {
            return Ok(Resolved::Literal(value.clone()));
        }

        let reference_time = dataset
            .reference_timestamp()
            .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().unwrap_or_else(Utc::now));
        let query = CalQuery {
            observing_mode: dataset.observing_mode().map(String::from),
            reference_time,
        };

        let candidates = self
            .store
            .find(cal_type, &query)
            .await
            .map_err(|e| EngineError::CalStore(e.to_string()))?;
        debug!(
            cal_type = %cal_type,
            candidates = candidates.len(),
            "queried calibration store"
        );

        match Self::select(candidates, reference_time) {
            Some(artifact) => {
                debug!(cal_type = %cal_type, id = %artifact.id, "resolved calibration");
                Ok(Resolved::Artifact(artifact))
            }
            None => match mode {
                SelectionMode::Automatic => {
                    Err(EngineError::RequiredCalibrationMissing(cal_type))
                }
                SelectionMode::AutomaticOptional => Ok(Resolved::Absent),
                SelectionMode::Explicit(_) => unreachable!("handled above"),
            },
        }
    }

    /// Pick the best candidate: prefer the artifact whose validity start is
    /// closest to (and not later than) the reference timestamp; if every
    /// candidate starts later, take the earliest of those. Exact ties break
    /// on creation sequence so runs stay reproducible.
    fn select(candidates: Vec<CalArtifact>, reference: DateTime<Utc>) -> Option<CalArtifact> {
        let (earlier, later): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|a| a.valid_from <= reference);

        if !earlier.is_empty() {
            earlier
                .into_iter()
                .max_by(|a, b| {
                    a.valid_from
                        .cmp(&b.valid_from)
                        // Larger seq loses: ties resolve to the earliest-created
                        .then(b.created_seq.cmp(&a.created_seq))
                })
        } else {
            later.into_iter().min_by(|a, b| {
                a.valid_from
                    .cmp(&b.valid_from)
                    .then(a.created_seq.cmp(&b.created_seq))
            })
        }
    }

    /// Register an artifact produced by a step. Under `jit_calib_id` the
    /// identifier is allocated at this moment from the artifact's content and
    /// recipe position; otherwise registration is left to an out-of-band
    /// process and `None` is returned.
    pub async fn register_produced(
        &self,
        artifact: NewCalArtifact,
        recipe_name: &str,
        step_index: usize,
    ) -> Result<Option<CalArtifact>, EngineError> {
        if !self.jit_calib_id {
            warn!(
                cal_type = %artifact.cal_type,
                "step produced a calibration artifact but jit_calib_id is off; skipping registration"
            );
            return Ok(None);
        }

        let id = self.allocator.allocate(
            artifact.cal_type,
            &artifact.content_digest,
            recipe_name,
            step_index,
        );
        let registered = self
            .store
            .register(&id, artifact)
            .await
            .map_err(|e| EngineError::CalStore(e.to_string()))?;
        Ok(Some(registered))
    }
}
