//! Test: steps run strictly in declared order and checkpoints stay distinct

use crate::helpers::*;
use drpipe::caldb::InMemoryCalDb;
use drpipe::core::ProcessingLevel;
use std::sync::Arc;

#[tokio::test]
async fn test_steps_execute_in_declared_order() {
    let json = format!(
        r#"{{
            "name": "ordered",
            "inputs": {},
            "steps": [
                {{ "name": "prescan_biassub",
                   "calibs": {{ "DetectorParams": "AUTOMATIC" }} }},
                {{ "name": "em_gain_division" }},
                {{ "name": "update_to_l2a" }},
                {{ "name": "save" }}
            ]
        }}"#,
        inputs_json(3)
    );

    let (outcome, _sink) = run_recipe(&json, Arc::new(seeded_caldb())).await;

    assert_completed(&outcome);
    assert_execution_order(
        &outcome,
        &["prescan_biassub", "em_gain_division", "update_to_l2a", "save"],
    );

    // Every surviving frame carries the operations in application order
    let dataset = outcome.dataset.unwrap();
    assert_eq!(dataset.level, ProcessingLevel::L2a);
    for frame in &dataset.frames {
        assert_eq!(frame.history, vec!["prescan_biassub", "em_gain_division"]);
    }
}

#[tokio::test]
async fn test_repeated_saves_yield_distinct_checkpoints() {
    let json = format!(
        r#"{{
            "name": "twosaves",
            "inputs": {},
            "steps": [
                {{ "name": "save" }},
                {{ "name": "em_gain_division" }},
                {{ "name": "save" }}
            ]
        }}"#,
        inputs_json(2)
    );

    let (outcome, sink) = run_recipe(&json, Arc::new(InMemoryCalDb::new())).await;

    assert_completed(&outcome);
    assert_eq!(outcome.checkpoints.len(), 2);
    assert_eq!(outcome.checkpoints[0].sequence, 1);
    assert_eq!(outcome.checkpoints[1].sequence, 2);

    let written = sink.written().await;
    assert_eq!(written.len(), 2);
    assert_ne!(written[0].label(), written[1].label());
}
