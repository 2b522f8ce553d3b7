//! Storage collaborators
//!
//! The engine never talks to a database. An embedding application supplies
//! an [`ExecutionStore`] for checkpoints and a [`TemplateSource`] for scenario
//! templates; in-memory implementations are provided for tests and tools.

use crate::orchestrator::checkpoint::ExecutionState;
use crate::scenario::ScenarioDef;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of one stored execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ExecutionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Persistence contract for execution checkpoints
pub trait ExecutionStore {
    fn get(&self, id: &ExecutionId) -> Option<ExecutionState>;

    fn put(&mut self, id: ExecutionId, state: ExecutionState);

    fn delete(&mut self, id: &ExecutionId);
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryExecutionStore {
    states: HashMap<ExecutionId, ExecutionState>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl ExecutionStore for InMemoryExecutionStore {
    fn get(&self, id: &ExecutionId) -> Option<ExecutionState> {
        self.states.get(id).cloned()
    }

    fn put(&mut self, id: ExecutionId, state: ExecutionState) {
        self.states.insert(id, state);
    }

    fn delete(&mut self, id: &ExecutionId) {
        self.states.remove(id);
    }
}

/// Read-only source of scenario templates
pub trait TemplateSource {
    fn template(&self, id: &str) -> Option<ScenarioDef>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryTemplates {
    templates: BTreeMap<String, ScenarioDef>,
}

impl InMemoryTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, scenario: ScenarioDef) {
        self.templates.insert(id.into(), scenario);
    }

    /// Template ids in sorted order
    pub fn ids(&self) -> Vec<&str> {
        self.templates.keys().map(|k| k.as_str()).collect()
    }
}

impl TemplateSource for InMemoryTemplates {
    fn template(&self, id: &str) -> Option<ScenarioDef> {
        self.templates.get(id).cloned()
    }
}
