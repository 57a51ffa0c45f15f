//! Test: subexposure grouping and processing-level transitions

use crate::helpers::*;
use drpipe::caldb::InMemoryCalDb;
use drpipe::core::StepStatus;
use std::sync::Arc;

fn combine_recipe(n_inputs: usize, remainder: Option<&str>) -> String {
    let remainder_kw = remainder
        .map(|r| format!(r#", "remainder": "{}""#, r))
        .unwrap_or_default();
    format!(
        r#"{{
            "name": "combine",
            "inputs": {},
            "steps": [
                {{ "name": "combine_subexposures",
                   "keywords": {{ "num_frames_per_group": 6{} }} }}
            ]
        }}"#,
        inputs_json(n_inputs),
        remainder_kw
    )
}

#[tokio::test]
async fn test_combine_even_groups() {
    let (outcome, _sink) =
        run_recipe(&combine_recipe(12, None), Arc::new(InMemoryCalDb::new())).await;

    assert_completed(&outcome);
    let dataset = outcome.dataset.unwrap();
    assert_eq!(dataset.frames.len(), 2);
    assert_eq!(outcome.report.steps[0].frames_in, 12);
    assert_eq!(outcome.report.steps[0].frames_out, 2);
}

#[tokio::test]
async fn test_combine_uneven_aborts_by_default() {
    let (outcome, _sink) =
        run_recipe(&combine_recipe(13, None), Arc::new(InMemoryCalDb::new())).await;

    assert_aborted(&outcome, "grouping");
}

#[tokio::test]
async fn test_combine_remainder_drop() {
    let (outcome, _sink) =
        run_recipe(&combine_recipe(13, Some("drop")), Arc::new(InMemoryCalDb::new())).await;

    assert_completed(&outcome);
    assert_eq!(outcome.dataset.unwrap().frames.len(), 2);
}

#[tokio::test]
async fn test_level_transition_must_strictly_advance() {
    let json = format!(
        r#"{{
            "name": "levels",
            "inputs": {},
            "steps": [
                {{ "name": "update_to_l2a" }},
                {{ "name": "update_to_l2a" }}
            ]
        }}"#,
        inputs_json(1)
    );

    let (outcome, _sink) = run_recipe(&json, Arc::new(InMemoryCalDb::new())).await;

    assert_aborted(&outcome, "level_regression");
    // The first transition succeeded before the repeat failed
    assert_eq!(outcome.report.steps[0].status, StepStatus::Completed);
    assert_eq!(outcome.report.steps[1].status, StepStatus::Failed);
}
