//! Test: checkpoint snapshots, write retry and exhaustion

use crate::helpers::*;
use drpipe::caldb::InMemoryCalDb;
use drpipe::core::ProcessingLevel;
use drpipe::execution::InMemorySink;
use drpipe::steps::StepRegistry;
use std::sync::Arc;

fn save_recipe(n_inputs: usize) -> String {
    format!(
        r#"{{
            "name": "snapshot",
            "inputs": {},
            "steps": [
                {{ "name": "update_to_l2a" }},
                {{ "name": "save" }}
            ]
        }}"#,
        inputs_json(n_inputs)
    )
}

#[tokio::test]
async fn test_checkpoint_captures_level_and_frames() {
    let (outcome, sink) = run_recipe(&save_recipe(3), Arc::new(InMemoryCalDb::new())).await;

    assert_completed(&outcome);
    assert_eq!(outcome.checkpoints.len(), 1);
    assert_eq!(outcome.checkpoints[0].frame_count, 3);

    let written = sink.written().await;
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].level, ProcessingLevel::L2a);
    assert_eq!(written[0].frames.len(), 3);
    assert_eq!(written[0].sequence, 1);
}

#[tokio::test]
async fn test_checkpoint_write_recovers_within_retry_budget() {
    let sink = Arc::new(InMemorySink::new());
    sink.fail_next_writes(2);

    let outcome = run_recipe_with(
        &save_recipe(2),
        Arc::new(InMemoryCalDb::new()),
        StepRegistry::with_builtins(),
        sink.clone(),
    )
    .await;

    // Two failures, then the third attempt lands
    assert_completed(&outcome);
    assert_eq!(sink.written().await.len(), 1);
}

#[tokio::test]
async fn test_checkpoint_write_exhaustion_aborts() {
    let sink = Arc::new(InMemorySink::new());
    sink.fail_next_writes(3);

    let outcome = run_recipe_with(
        &save_recipe(2),
        Arc::new(InMemoryCalDb::new()),
        StepRegistry::with_builtins(),
        sink.clone(),
    )
    .await;

    assert_aborted(&outcome, "checkpoint_io");
    assert!(sink.written().await.is_empty());
}
