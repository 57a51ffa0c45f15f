//! Test utility functions for drpipe

use chrono::{DateTime, TimeZone, Utc};
use drpipe::caldb::{
    CalArtifact, CalIdAllocator, CalType, CalibrationResolver, InMemoryCalDb,
};
use drpipe::core::{DatasetState, Keywords, Recipe, RunStatus};
use drpipe::execution::{InMemorySink, PipelineRunner, RunOutcome};
use drpipe::steps::{
    apply_per_frame, ResolvedCalibs, StepError, StepOperation, StepOutput, StepRegistry,
};
use std::sync::Arc;

pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

/// A calibration database holding one mode-agnostic artifact of every type,
/// all valid from before the synthetic dataset epoch.
pub fn seeded_caldb() -> InMemoryCalDb {
    let mut db = InMemoryCalDb::new();
    let seeds = [
        ("detpar_001", CalType::DetectorParams),
        ("kgain_001", CalType::KGain),
        ("nonlin_001", CalType::NonLinearityCalibration),
        ("noisemap_001", CalType::DetectorNoiseMaps),
        ("dark_001", CalType::Dark),
        ("flat_001", CalType::FlatField),
        ("trap_001", CalType::TrapCalibration),
        ("bpmap_001", CalType::BadPixelMap),
    ];
    for (id, cal_type) in seeds {
        db.insert(CalArtifact {
            id: id.to_string(),
            cal_type,
            observing_mode: None,
            valid_from: ts(-3600),
            created_seq: 0,
            location: format!("mem://{}", id),
        });
    }
    db
}

/// JSON array of input references `obs_000 .. obs_{n-1}` for recipe documents
pub fn inputs_json(n: usize) -> String {
    let refs: Vec<String> = (0..n).map(|i| format!("\"obs_{:03}.fits\"", i)).collect();
    format!("[{}]", refs.join(", "))
}

/// Operation that fails on specific frames, for exercising the error
/// tracking policies.
pub struct FaultyOp {
    fail_frames: Vec<String>,
}

impl FaultyOp {
    pub fn failing<I, S>(frames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fail_frames: frames.into_iter().map(Into::into).collect(),
        }
    }
}

impl StepOperation for FaultyOp {
    fn execute(
        &self,
        dataset: DatasetState,
        _calibs: &ResolvedCalibs,
        _keywords: &Keywords,
    ) -> Result<StepOutput, StepError> {
        Ok(apply_per_frame(dataset, "faulty_op", |frame| {
            if self.fail_frames.iter().any(|id| id == &frame.id) {
                Err("synthetic frame failure".to_string())
            } else {
                Ok(())
            }
        }))
    }
}

/// Parse and run a recipe against a dataset derived from its inputs, using
/// the given store and registry. Returns the outcome and the in-memory
/// checkpoint sink for inspection.
pub async fn run_recipe_with(
    recipe_json: &str,
    store: Arc<InMemoryCalDb>,
    registry: StepRegistry,
    sink: Arc<InMemorySink>,
) -> RunOutcome {
    let recipe = Recipe::from_json(recipe_json).expect("recipe should parse");
    let dataset = DatasetState::from_inputs(&recipe.inputs);
    let resolver = Arc::new(CalibrationResolver::new(
        store,
        Arc::new(CalIdAllocator::new()),
        recipe.drpconfig.jit_calib_id,
    ));
    let runner = PipelineRunner::new(Arc::new(registry), resolver, sink);
    runner.run(&recipe, dataset).await
}

/// Run a recipe with the built-in registry and a fresh in-memory sink
pub async fn run_recipe(
    recipe_json: &str,
    store: Arc<InMemoryCalDb>,
) -> (RunOutcome, Arc<InMemorySink>) {
    let sink = Arc::new(InMemorySink::new());
    let outcome = run_recipe_with(
        recipe_json,
        store,
        StepRegistry::with_builtins(),
        sink.clone(),
    )
    .await;
    (outcome, sink)
}

pub fn assert_completed(outcome: &RunOutcome) {
    assert_eq!(
        outcome.status,
        RunStatus::Completed,
        "expected completion, got abort: {:?}",
        outcome.report.abort
    );
    assert!(outcome.dataset.is_some());
}

pub fn assert_aborted(outcome: &RunOutcome, kind: &str) {
    assert_eq!(outcome.status, RunStatus::Aborted);
    let abort = outcome
        .report
        .abort
        .as_ref()
        .expect("aborted run should carry abort info");
    assert_eq!(abort.kind, kind, "unexpected abort: {:?}", abort);
}

pub fn assert_execution_order(outcome: &RunOutcome, expected: &[&str]) {
    assert_eq!(outcome.report.executed_steps(), expected);
}

#[cfg(test)]
mod tests {
    use super::*;
    use drpipe::caldb::{CalQuery, CalibrationStore};

    #[tokio::test]
    async fn test_seeded_caldb_covers_every_type() {
        let db = seeded_caldb();
        let query = CalQuery {
            observing_mode: None,
            reference_time: ts(0),
        };
        for cal_type in [CalType::Dark, CalType::FlatField, CalType::TrapCalibration] {
            assert_eq!(db.find(cal_type, &query).await.unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_run_recipe_helper_smoke() {
        let json = format!(
            r#"{{ "name": "smoke", "inputs": {}, "steps": [ {{ "name": "em_gain_division" }} ] }}"#,
            inputs_json(2)
        );
        let (outcome, _sink) = run_recipe(&json, Arc::new(InMemoryCalDb::new())).await;
        assert_completed(&outcome);
    }
}
