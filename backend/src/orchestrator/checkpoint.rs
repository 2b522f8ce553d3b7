//! Checkpoint - Save/Load Execution State
//!
//! Serializable snapshot of a running engine so an external store can pause
//! and resume executions between ticks.
//!
//! # Critical Invariants
//!
//! - **Determinism**: restoring a snapshot and ticking reproduces the same
//!   log the original engine would have produced
//! - **Scenario Matching**: a state can only be restored into an engine built
//!   from the same scenario document (SHA-256 of its canonical JSON)
//! - **Log Integrity**: `eventCounter` equals the last entry's sequence and
//!   sequences are strictly increasing

use crate::core::time::SimTime;
use crate::models::history::HistoryEntry;
use crate::models::token::NodeId;
use crate::orchestrator::SimulationError;
use crate::runtime::{Delivery, NodeState};
use crate::scenario::ValidScenario;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

// ============================================================================
// Snapshot Structures
// ============================================================================

/// Complete execution state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    /// Runtime state per node id
    pub node_states: BTreeMap<NodeId, NodeState>,

    /// Tokens delivered on back edges, waiting for the next tick
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pending_deliveries: BTreeMap<NodeId, Vec<Delivery>>,

    pub current_time: SimTime,

    /// Sequence of the last history entry
    pub event_counter: u64,

    pub global_activity_log: Vec<HistoryEntry>,

    /// Sequences of each node's entries in the global log
    pub node_activity_logs: BTreeMap<NodeId, Vec<u64>>,

    pub tick_count: u64,

    /// RNG state at time of snapshot (CRITICAL for determinism)
    pub rng_state: u64,

    pub next_token_id: u64,

    pub next_message_id: u64,

    /// SHA-256 of the scenario document
    pub scenario_hash: String,
}

impl ExecutionState {
    pub fn to_json(&self) -> Result<String, SimulationError> {
        serde_json::to_string(self).map_err(|e| {
            SimulationError::Serialization(format!("Execution state serialization failed: {}", e))
        })
    }

    pub fn from_json(json: &str) -> Result<Self, SimulationError> {
        serde_json::from_str(json).map_err(|e| {
            SimulationError::Serialization(format!("Execution state deserialization failed: {}", e))
        })
    }
}

/// Per-node sequence index over a log
pub fn index_by_node(entries: &[HistoryEntry]) -> BTreeMap<NodeId, Vec<u64>> {
    let mut index: BTreeMap<NodeId, Vec<u64>> = BTreeMap::new();
    for entry in entries {
        index
            .entry(entry.node_id.clone())
            .or_default()
            .push(entry.sequence);
    }
    index
}

// ============================================================================
// Scenario Hash
// ============================================================================

/// SHA-256 over the canonical (sorted-key) JSON form of `value`
pub fn compute_scenario_hash<T: Serialize>(value: &T) -> Result<String, SimulationError> {
    use serde_json::Value;

    let value = serde_json::to_value(value).map_err(|e| {
        SimulationError::Serialization(format!("Scenario serialization failed: {}", e))
    })?;

    fn canonicalize(value: Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: BTreeMap<String, Value> =
                    map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
                Value::Object(sorted.into_iter().collect())
            }
            Value::Array(arr) => Value::Array(arr.into_iter().map(canonicalize).collect()),
            other => other,
        }
    }

    let json = serde_json::to_string(&canonicalize(value)).map_err(|e| {
        SimulationError::Serialization(format!("Scenario serialization failed: {}", e))
    })?;

    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

// ============================================================================
// Validation Functions
// ============================================================================

/// Check a state against the scenario it is being restored into
///
/// Returns node states and pending inboxes ordered by node index.
pub(crate) fn check_execution_state(
    scenario: &ValidScenario,
    scenario_hash: &str,
    state: &ExecutionState,
) -> Result<(Vec<NodeState>, Vec<Vec<Delivery>>), SimulationError> {
    if state.scenario_hash != scenario_hash {
        return Err(SimulationError::ScenarioMismatch {
            expected: scenario_hash.to_string(),
            found: state.scenario_hash.clone(),
        });
    }

    let last_sequence = state.global_activity_log.last().map_or(0, |e| e.sequence);
    if state.event_counter != last_sequence {
        return Err(SimulationError::CorruptState(format!(
            "eventCounter {} does not match last log sequence {}",
            state.event_counter, last_sequence
        )));
    }
    if state.next_token_id == 0 || state.next_message_id == 0 {
        return Err(SimulationError::CorruptState(
            "id counters start at 1".to_string(),
        ));
    }

    for node_id in state.node_states.keys().chain(state.pending_deliveries.keys()) {
        if scenario.node(node_id).is_none() {
            return Err(SimulationError::UnknownNode(node_id.clone()));
        }
    }

    let mut states = Vec::with_capacity(scenario.nodes().len());
    let mut inboxes = Vec::with_capacity(scenario.nodes().len());
    for node in scenario.nodes() {
        let node_state = state
            .node_states
            .get(node.node_id())
            .ok_or_else(|| SimulationError::MissingNodeState(node.node_id().to_string()))?;
        if node_state.kind() != node.kind() {
            return Err(SimulationError::StateMismatch {
                node_id: node.node_id().to_string(),
                expected: node.kind(),
                found: node_state.kind(),
            });
        }
        states.push(node_state.clone());
        inboxes.push(
            state
                .pending_deliveries
                .get(node.node_id())
                .cloned()
                .unwrap_or_default(),
        );
    }

    Ok((states, inboxes))
}
