//! Scenario definition and validation
//!
//! - types.rs: the JSON "workflow protocol" document as deserialized
//! - validation.rs: collects every violation in one pass
//! - model.rs: the validated, closed node model the scheduler runs

pub mod model;
pub mod types;
pub mod validation;

pub use model::{Node, NodeMeta, ValidScenario};
pub use types::{AggregationMethod, NodeDef, NodeKind, ScenarioDef, SCENARIO_VERSION};
pub use validation::{validate, ValidationError};

use thiserror::Error;

/// Failure to load a scenario document
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Scenario JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Scenario failed validation with {} error(s)", .0.len())]
    Invalid(Vec<ValidationError>),
}

impl ScenarioError {
    /// Validation errors, if this is a validation failure
    pub fn validation_errors(&self) -> &[ValidationError] {
        match self {
            ScenarioError::Invalid(errors) => errors,
            ScenarioError::Parse(_) => &[],
        }
    }
}

/// Parse and validate a scenario document
pub fn load_scenario(json: &str) -> Result<ValidScenario, ScenarioError> {
    let def = ScenarioDef::from_json(json)?;
    validate(def).map_err(ScenarioError::Invalid)
}
