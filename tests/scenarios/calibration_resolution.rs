//! Test: calibration selection modes against the store

use crate::helpers::*;
use drpipe::caldb::InMemoryCalDb;
use drpipe::core::RunStatus;
use serde_json::Value;
use std::sync::Arc;

#[tokio::test]
async fn test_automatic_resolves_seeded_artifact() {
    let json = format!(
        r#"{{
            "name": "auto",
            "inputs": {},
            "steps": [
                {{ "name": "dark_subtraction",
                   "calibs": {{ "Dark": "AUTOMATIC" }} }}
            ]
        }}"#,
        inputs_json(2)
    );

    let (outcome, _sink) = run_recipe(&json, Arc::new(seeded_caldb())).await;

    assert_completed(&outcome);
    let dataset = outcome.dataset.unwrap();
    for frame in &dataset.frames {
        assert_eq!(frame.metadata["dark_used"], Value::from("dark_001"));
    }
}

#[tokio::test]
async fn test_required_calibration_missing_aborts() {
    let json = format!(
        r#"{{
            "name": "missing",
            "inputs": {},
            "steps": [
                {{ "name": "dark_subtraction",
                   "calibs": {{ "Dark": "AUTOMATIC" }} }}
            ]
        }}"#,
        inputs_json(2)
    );

    // Empty store: no dark exists
    let (outcome, _sink) = run_recipe(&json, Arc::new(InMemoryCalDb::new())).await;

    assert_aborted(&outcome, "required_calibration_missing");
    assert_eq!(outcome.report.steps.len(), 1);
    assert_eq!(outcome.report.steps[0].name, "dark_subtraction");
}

#[tokio::test]
async fn test_optional_missing_continues_without_artifact() {
    let json = format!(
        r#"{{
            "name": "optional",
            "inputs": {},
            "steps": [
                {{ "name": "cti_correction",
                   "calibs": {{ "TrapCalibration": "AUTOMATIC, OPTIONAL" }} }}
            ]
        }}"#,
        inputs_json(2)
    );

    let (outcome, _sink) = run_recipe(&json, Arc::new(InMemoryCalDb::new())).await;

    assert_eq!(outcome.status, RunStatus::Completed);
    let dataset = outcome.dataset.unwrap();
    for frame in &dataset.frames {
        // The step ran but applied no correction
        assert_eq!(frame.metadata["cti_corrected"], Value::Bool(false));
        assert_eq!(frame.history, vec!["cti_correction"]);
    }
}

#[tokio::test]
async fn test_explicit_literal_bypasses_the_store() {
    let json = format!(
        r#"{{
            "name": "explicit",
            "inputs": {},
            "steps": [
                {{ "name": "dark_subtraction",
                   "calibs": {{ "Dark": 2.2 }} }}
            ]
        }}"#,
        inputs_json(2)
    );

    // Empty store: a literal must never trigger a lookup
    let (outcome, _sink) = run_recipe(&json, Arc::new(InMemoryCalDb::new())).await;

    assert_completed(&outcome);
    let dataset = outcome.dataset.unwrap();
    for frame in &dataset.frames {
        assert_eq!(frame.metadata["dark_subtracted"], Value::Bool(true));
        assert!(!frame.metadata.contains_key("dark_used"));
    }
}
