//! Recipe schema, parsing and validation

use crate::caldb::CalType;
use crate::core::error::SchemaError;
use crate::steps::{EngineStep, StepRegistry};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Keyword overrides handed to a step operation. Values are scalars only;
/// the loader rejects nested shapes.
pub type Keywords = BTreeMap<String, Value>;

/// How a step's calibration requirement is satisfied. Parsed at the schema
/// boundary; the engine never carries the raw string.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionMode {
    /// The resolver must find a matching artifact or the step fails
    Automatic,
    /// Absence is tolerated; the step receives an absence token
    AutomaticOptional,
    /// A literal value (numeric keyword or direct path), no resolution
    Explicit(Value),
}

impl SelectionMode {
    /// Parsing rule for `calibs` values: case- and whitespace-insensitive;
    /// the substring `OPTIONAL` selects tolerated-absence, otherwise any
    /// string containing `AUTOMATIC` is a hard requirement. Everything else
    /// is an explicit literal.
    pub fn parse(value: &Value) -> Self {
        if let Value::String(s) = value {
            let normalized: String = s
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_ascii_uppercase();
            if normalized.contains("OPTIONAL") {
                return SelectionMode::AutomaticOptional;
            }
            if normalized.contains("AUTOMATIC") {
                return SelectionMode::Automatic;
            }
        }
        SelectionMode::Explicit(value.clone())
    }
}

/// Engine configuration flags from the recipe's `drpconfig` block
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct DrpConfig {
    /// Per-item error tracking: frame-attributable step errors exclude the
    /// offending frames instead of aborting the run
    #[serde(default)]
    pub track_individual_errors: bool,

    /// Assign calibration identifiers to artifacts created mid-run
    #[serde(default)]
    pub jit_calib_id: bool,
}

/// One validated recipe step
#[derive(Debug, Clone)]
pub struct Step {
    pub name: String,

    /// Declared calibration requirements, in deterministic order
    pub calibs: Vec<(CalType, SelectionMode)>,

    /// Keyword overrides for the operation
    pub keywords: Keywords,
}

/// A fully-validated, immutable recipe
#[derive(Debug, Clone)]
pub struct Recipe {
    pub name: String,
    pub template: bool,
    pub drpconfig: DrpConfig,
    pub inputs: Vec<String>,
    pub outputdir: PathBuf,
    pub steps: Vec<Step>,
}

// Raw serde shapes; converted to the typed model during validation
#[derive(Deserialize)]
struct RawRecipe {
    name: String,
    #[serde(default)]
    template: bool,
    #[serde(default)]
    drpconfig: DrpConfig,
    #[serde(default)]
    inputs: Vec<String>,
    #[serde(default = "default_outputdir")]
    outputdir: PathBuf,
    #[serde(default)]
    steps: Vec<RawStep>,
}

#[derive(Deserialize)]
struct RawStep {
    name: String,
    #[serde(default)]
    calibs: BTreeMap<String, Value>,
    #[serde(default)]
    keywords: BTreeMap<String, Value>,
}

fn default_outputdir() -> PathBuf {
    PathBuf::from(".")
}

impl Recipe {
    /// Load a recipe document from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read recipe {}", path.as_ref().display()))?;
        Ok(Self::from_json(&content)?)
    }

    /// Parse and validate a recipe document from a JSON string
    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        let raw: RawRecipe = serde_json::from_str(json)?;

        if raw.steps.is_empty() {
            return Err(SchemaError::EmptySteps(raw.name));
        }

        let mut steps = Vec::with_capacity(raw.steps.len());
        for raw_step in raw.steps {
            let mut calibs = Vec::with_capacity(raw_step.calibs.len());
            for (key, value) in &raw_step.calibs {
                let cal_type = CalType::parse(key).ok_or_else(|| SchemaError::UnknownCalType {
                    step: raw_step.name.clone(),
                    calib: key.clone(),
                })?;
                calibs.push((cal_type, SelectionMode::parse(value)));
            }

            for (key, value) in &raw_step.keywords {
                if value.is_object() || value.is_array() {
                    return Err(SchemaError::NonScalarKeyword {
                        step: raw_step.name.clone(),
                        keyword: key.clone(),
                    });
                }
            }

            steps.push(Step {
                name: raw_step.name,
                calibs,
                keywords: raw_step.keywords,
            });
        }

        Ok(Recipe {
            name: raw.name,
            template: raw.template,
            drpconfig: raw.drpconfig,
            inputs: raw.inputs,
            outputdir: raw.outputdir,
            steps,
        })
    }

    /// Cross-check every step name against the registry's known operations
    /// and the engine-level step names. Run at load time so unknown steps
    /// never reach execution.
    pub fn validate_steps(&self, registry: &StepRegistry) -> Result<(), SchemaError> {
        for step in &self.steps {
            if !registry.contains(&step.name) && EngineStep::classify(&step.name).is_none() {
                return Err(SchemaError::UnknownStepName(step.name.clone()));
            }
        }
        Ok(())
    }
}

impl Step {
    /// Read a keyword as an unsigned integer
    pub fn keyword_usize(&self, key: &str) -> Option<usize> {
        self.keywords
            .get(key)
            .and_then(Value::as_u64)
            .map(|v| v as usize)
    }

    /// Read a keyword as a string
    pub fn keyword_str(&self, key: &str) -> Option<&str> {
        self.keywords.get(key).and_then(Value::as_str)
    }
}
