//! Test: per-item error tracking vs fail-fast

use crate::helpers::*;
use drpipe::caldb::InMemoryCalDb;
use drpipe::execution::InMemorySink;
use drpipe::steps::StepRegistry;
use std::sync::Arc;

fn registry_with_faulty(fail_frames: &[&str]) -> StepRegistry {
    let mut registry = StepRegistry::with_builtins();
    registry.register(
        "faulty_op",
        Arc::new(FaultyOp::failing(fail_frames.iter().copied())),
    );
    registry
}

fn faulty_recipe(n_inputs: usize, track: bool) -> String {
    format!(
        r#"{{
            "name": "faulty",
            "drpconfig": {{ "track_individual_errors": {} }},
            "inputs": {},
            "steps": [
                {{ "name": "faulty_op" }},
                {{ "name": "em_gain_division" }}
            ]
        }}"#,
        track,
        inputs_json(n_inputs)
    )
}

#[tokio::test]
async fn test_tracking_excludes_failed_frames_and_continues() {
    let outcome = run_recipe_with(
        &faulty_recipe(5, true),
        Arc::new(InMemoryCalDb::new()),
        registry_with_faulty(&["obs_001"]),
        Arc::new(InMemorySink::new()),
    )
    .await;

    assert_completed(&outcome);
    assert_execution_order(&outcome, &["faulty_op", "em_gain_division"]);

    // One frame out, four carried to the end
    let dataset = outcome.dataset.unwrap();
    assert_eq!(dataset.frames.len(), 4);
    assert!(dataset.frames.iter().all(|f| f.id != "obs_001"));

    assert_eq!(outcome.report.frame_errors.len(), 1);
    assert_eq!(outcome.report.frame_errors[0].frame_id, "obs_001");
    assert_eq!(outcome.report.steps[0].frames_in, 5);
    assert_eq!(outcome.report.steps[0].frames_out, 4);
}

#[tokio::test]
async fn test_fail_fast_aborts_on_first_frame_error() {
    let outcome = run_recipe_with(
        &faulty_recipe(5, false),
        Arc::new(InMemoryCalDb::new()),
        registry_with_faulty(&["obs_001"]),
        Arc::new(InMemorySink::new()),
    )
    .await;

    assert_aborted(&outcome, "step_execution");
    // The second step never ran
    assert_eq!(outcome.report.executed_steps(), vec!["faulty_op"]);
    // The offending frame is still identified in the report
    assert_eq!(outcome.report.frame_errors.len(), 1);
    assert_eq!(outcome.report.frame_errors[0].frame_id, "obs_001");
}

#[tokio::test]
async fn test_tracking_with_no_viable_frames_aborts() {
    let outcome = run_recipe_with(
        &faulty_recipe(2, true),
        Arc::new(InMemoryCalDb::new()),
        registry_with_faulty(&["obs_000", "obs_001"]),
        Arc::new(InMemorySink::new()),
    )
    .await;

    assert_aborted(&outcome, "no_viable_frames");
    assert_eq!(outcome.report.frame_errors.len(), 2);
}
