//! Workflow Engine
//!
//! Main simulation loop driving the node runtimes over discrete time.
//!
//! # Architecture
//!
//! ```text
//! For each tick:
//! 1. Advance time by tick_interval
//! 2. Invoke every node in schedule order (producers before consumers,
//!    ties by declaration order, cycle members appended)
//!    - hand the node its inbox
//!    - deliver its emissions to destination inboxes
//! 3. Deliveries to a node later in the order are consumed this tick;
//!    deliveries along a back edge wait for the next tick
//! ```
//!
//! The engine never stops on its own; callers drive it with [`Engine::tick`],
//! [`Engine::run_ticks`] or a [`RunBudget`].
//!
//! # Example
//!
//! ```rust
//! use workflow_simulator_core_rs::{Engine, EngineConfig};
//!
//! let json = r#"{
//!   "version": "1.0",
//!   "nodes": [
//!     {"type": "DataSource", "nodeId": "src", "interval": 1, "valueMin": 1, "valueMax": 6, "destinationNodeId": "bin"},
//!     {"type": "Sink", "nodeId": "bin"}
//!   ]
//! }"#;
//!
//! let mut engine = Engine::from_json(json, EngineConfig::default()).unwrap();
//! for _ in 0..3 {
//!     let result = engine.tick().unwrap();
//!     assert_eq!(result.tokens_created, 1);
//! }
//! assert_eq!(engine.current_time(), 3);
//! ```

use crate::core::time::{SimClock, SimTime, WallClock};
use crate::lineage::{
    check_graph, IntegrityReport, TokenGraph, TokenLineageTracker, DEFAULT_MAX_LINEAGE_DEPTH,
    DEFAULT_MAX_PATH_DEPTH,
};
use crate::models::history::{ActivityLog, HistoryAction, HistoryEntry, HistoryFilter, SequenceError};
use crate::orchestrator::checkpoint::{check_execution_state, compute_scenario_hash, index_by_node, ExecutionState};
use crate::orchestrator::store::{ExecutionId, ExecutionStore, TemplateSource};
use crate::runtime::{Delivery, NodeState, RunContext};
use crate::scenario::{load_scenario, validate, NodeKind, ScenarioError, ValidScenario};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

// ============================================================================
// Configuration Types
// ============================================================================

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// RNG seed for deterministic DataSource sampling
    pub rng_seed: u64,

    /// Simulated time units per tick (Δ)
    pub tick_interval: SimTime,

    /// Source of history `epochTimestamp`s
    pub wall_clock: WallClock,

    /// Lineage depth above which integrity checks warn
    pub max_lineage_depth: usize,

    /// Edge limit for path enumeration
    pub max_path_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rng_seed: 0,
            tick_interval: 1,
            wall_clock: WallClock::System,
            max_lineage_depth: DEFAULT_MAX_LINEAGE_DEPTH,
            max_path_depth: DEFAULT_MAX_PATH_DEPTH,
        }
    }
}

/// Caller-side stopping policy for [`Engine::run_until`]; any limit reached stops the run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunBudget {
    /// Stop once simulated time reaches this value
    pub max_time: Option<SimTime>,

    /// Stop once this many tokens exist in total
    pub max_tokens: Option<u64>,

    /// Stop after this many ticks of this call
    pub max_ticks: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    TimeLimit,
    TokenLimit,
    TickLimit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub ticks_run: u64,
    pub final_time: SimTime,
    pub tokens_created: u64,
    pub stop_reason: StopReason,
}

/// Result of a single tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickResult {
    /// Tick number (1-based)
    pub tick: u64,

    /// Simulated time processed
    pub time: SimTime,

    pub tokens_created: u64,

    pub tokens_consumed: usize,

    pub entries_appended: usize,

    pub errors: usize,
}

/// Simulation error types
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Scenario(#[from] ScenarioError),

    #[error("Scenario template not found: {0}")]
    TemplateNotFound(String),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(ExecutionId),

    #[error("Execution state belongs to scenario {found}, engine runs {expected}")]
    ScenarioMismatch { expected: String, found: String },

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("No state for node {0}")]
    MissingNodeState(String),

    #[error("Node {node_id} is a {expected} but its state is for a {found}")]
    StateMismatch {
        node_id: String,
        expected: NodeKind,
        found: NodeKind,
    },

    #[error("Corrupt execution state: {0}")]
    CorruptState(String),

    #[error("Corrupt activity log: {0}")]
    InvalidHistory(#[from] SequenceError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Run budget sets no limit")]
    UnboundedRun,
}

// ============================================================================
// Engine
// ============================================================================

/// Workflow simulation engine for one scenario
pub struct Engine {
    config: EngineConfig,
    scenario: ValidScenario,
    scenario_hash: String,
    clock: SimClock,
    /// Runtime state by node index
    states: Vec<NodeState>,
    /// Pending deliveries by node index
    inboxes: Vec<Vec<Delivery>>,
    ctx: RunContext,
}

impl Engine {
    /// Create an engine at `t = 0`
    pub fn new(scenario: ValidScenario, config: EngineConfig) -> Result<Self, SimulationError> {
        if config.tick_interval == 0 {
            return Err(SimulationError::InvalidConfig(
                "tick_interval must be positive".to_string(),
            ));
        }

        let scenario_hash = compute_scenario_hash(scenario.definition())?;
        let states = scenario.nodes().iter().map(NodeState::initial).collect();
        let inboxes = vec![Vec::new(); scenario.nodes().len()];
        info!(
            nodes = scenario.nodes().len(),
            schedule = ?scenario.schedule_ids(),
            seed = config.rng_seed,
            "engine created"
        );

        Ok(Self {
            clock: SimClock::new(config.tick_interval),
            ctx: RunContext::new(config.rng_seed, config.wall_clock),
            config,
            scenario,
            scenario_hash,
            states,
            inboxes,
        })
    }

    /// Parse, validate and build
    pub fn from_json(json: &str, config: EngineConfig) -> Result<Self, SimulationError> {
        Self::new(load_scenario(json)?, config)
    }

    /// Build from a stored scenario template
    pub fn from_template(
        source: &dyn TemplateSource,
        template_id: &str,
        config: EngineConfig,
    ) -> Result<Self, SimulationError> {
        let def = source
            .template(template_id)
            .ok_or_else(|| SimulationError::TemplateNotFound(template_id.to_string()))?;
        let scenario = validate(def).map_err(ScenarioError::Invalid)?;
        Self::new(scenario, config)
    }

    // ========================================================================
    // Tick Loop
    // ========================================================================

    /// Execute one tick
    pub fn tick(&mut self) -> Result<TickResult, SimulationError> {
        // Everything that can fail is checked before any state changes
        self.check_runnable()?;

        let now = self.clock.next_time();
        let first_sequence = self.ctx.log().last_sequence();
        let tokens_before = self.ctx.tokens_created();

        for &index in self.scenario.schedule() {
            let node = &self.scenario.nodes()[index];
            let inbox = std::mem::take(&mut self.inboxes[index]);
            let emissions = self.states[index]
                .on_tick(node, now, inbox, &mut self.ctx)
                .ok_or_else(|| SimulationError::StateMismatch {
                    node_id: node.node_id().to_string(),
                    expected: node.kind(),
                    found: self.states[index].kind(),
                })?;

            for emission in emissions {
                let target = self
                    .scenario
                    .node_index(&emission.destination)
                    .ok_or_else(|| SimulationError::UnknownNode(emission.destination.clone()))?;
                self.inboxes[target].push(Delivery {
                    from: node.node_id().to_string(),
                    token: emission.token,
                });
            }
        }
        self.clock.advance();

        let appended = self.ctx.log().entries_since(first_sequence);
        let result = TickResult {
            tick: self.clock.tick_count(),
            time: now,
            tokens_created: self.ctx.tokens_created() - tokens_before,
            tokens_consumed: appended
                .iter()
                .filter(|e| e.action == HistoryAction::Consumed)
                .count(),
            entries_appended: appended.len(),
            errors: appended
                .iter()
                .filter(|e| e.action == HistoryAction::Error)
                .count(),
        };

        if result.errors > 0 {
            warn!(tick = result.tick, time = now, errors = result.errors, "tick recorded errors");
        }
        debug!(
            tick = result.tick,
            time = now,
            created = result.tokens_created,
            consumed = result.tokens_consumed,
            entries = result.entries_appended,
            "tick complete"
        );
        Ok(result)
    }

    /// Every node state matches its node kind and every destination resolves
    fn check_runnable(&self) -> Result<(), SimulationError> {
        for (node, state) in self.scenario.nodes().iter().zip(&self.states) {
            if state.kind() != node.kind() {
                return Err(SimulationError::StateMismatch {
                    node_id: node.node_id().to_string(),
                    expected: node.kind(),
                    found: state.kind(),
                });
            }
            if let Some(target) = node
                .destinations()
                .into_iter()
                .find(|d| self.scenario.node_index(d).is_none())
            {
                return Err(SimulationError::UnknownNode(target.to_string()));
            }
        }
        Ok(())
    }

    /// Execute `n` ticks
    pub fn run_ticks(&mut self, n: u64) -> Result<Vec<TickResult>, SimulationError> {
        (0..n).map(|_| self.tick()).collect()
    }

    /// Tick until a budget limit is reached
    ///
    /// Limits already reached before the first tick stop immediately.
    pub fn run_until(&mut self, budget: RunBudget) -> Result<RunSummary, SimulationError> {
        if budget.max_time.is_none() && budget.max_tokens.is_none() && budget.max_ticks.is_none() {
            return Err(SimulationError::UnboundedRun);
        }

        let mut ticks_run = 0;
        let stop_reason = loop {
            if budget.max_time.map_or(false, |t| self.current_time() >= t) {
                break StopReason::TimeLimit;
            }
            if budget.max_tokens.map_or(false, |n| self.ctx.tokens_created() >= n) {
                break StopReason::TokenLimit;
            }
            if budget.max_ticks.map_or(false, |n| ticks_run >= n) {
                break StopReason::TickLimit;
            }
            self.tick()?;
            ticks_run += 1;
        };

        info!(ticks = ticks_run, time = self.current_time(), reason = ?stop_reason, "run stopped");
        Ok(RunSummary {
            ticks_run,
            final_time: self.current_time(),
            tokens_created: self.ctx.tokens_created(),
            stop_reason,
        })
    }

    /// Back to `t = 0` with empty log, lineage and node state
    pub fn reset(&mut self) {
        self.clock.reset();
        self.states = self.scenario.nodes().iter().map(NodeState::initial).collect();
        self.inboxes = vec![Vec::new(); self.scenario.nodes().len()];
        self.ctx.reset(self.config.rng_seed);
        info!("engine reset");
    }

    // ========================================================================
    // Checkpointing
    // ========================================================================

    pub fn snapshot(&self) -> ExecutionState {
        let node_states = self
            .scenario
            .nodes()
            .iter()
            .zip(&self.states)
            .map(|(node, state)| (node.node_id().to_string(), state.clone()))
            .collect();
        let pending_deliveries = self
            .scenario
            .nodes()
            .iter()
            .zip(&self.inboxes)
            .filter(|(_, inbox)| !inbox.is_empty())
            .map(|(node, inbox)| (node.node_id().to_string(), inbox.clone()))
            .collect();
        let entries = self.ctx.log().entries();

        ExecutionState {
            node_states,
            pending_deliveries,
            current_time: self.clock.current_time(),
            event_counter: self.ctx.log().last_sequence(),
            global_activity_log: entries.to_vec(),
            node_activity_logs: index_by_node(entries),
            tick_count: self.clock.tick_count(),
            rng_state: self.ctx.rng_state(),
            next_token_id: self.ctx.next_token_id(),
            next_message_id: self.ctx.next_message_id(),
            scenario_hash: self.scenario_hash.clone(),
        }
    }

    /// Replace the whole execution state; on error the engine is unchanged
    pub fn restore(&mut self, state: ExecutionState) -> Result<(), SimulationError> {
        let (states, inboxes) = check_execution_state(&self.scenario, &self.scenario_hash, &state)?;
        let log = ActivityLog::from_entries(state.global_activity_log)?;

        let scenario = &self.scenario;
        let node_names = |node_id: &str| {
            scenario
                .node(node_id)
                .map_or_else(|| node_id.to_string(), |n| n.meta().display_name.clone())
        };
        let ctx = RunContext::from_parts(
            log,
            state.rng_state,
            self.config.wall_clock,
            state.next_token_id,
            state.next_message_id,
            &node_names,
        );

        self.clock = SimClock::from_parts(state.current_time, self.config.tick_interval, state.tick_count);
        self.states = states;
        self.inboxes = inboxes;
        self.ctx = ctx;
        info!(time = state.current_time, entries = state.event_counter, "execution restored");
        Ok(())
    }

    pub fn save_to(&self, store: &mut dyn ExecutionStore, id: ExecutionId) {
        store.put(id, self.snapshot());
    }

    pub fn load_from(&mut self, store: &dyn ExecutionStore, id: &ExecutionId) -> Result<(), SimulationError> {
        let state = store.get(id).ok_or(SimulationError::ExecutionNotFound(*id))?;
        self.restore(state)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn scenario(&self) -> &ValidScenario {
        &self.scenario
    }

    pub fn scenario_hash(&self) -> &str {
        &self.scenario_hash
    }

    pub fn current_time(&self) -> SimTime {
        self.clock.current_time()
    }

    pub fn tick_count(&self) -> u64 {
        self.clock.tick_count()
    }

    pub fn tokens_created(&self) -> u64 {
        self.ctx.tokens_created()
    }

    pub fn activity_log(&self) -> &ActivityLog {
        self.ctx.log()
    }

    pub fn history(&self, filter: &HistoryFilter) -> Vec<HistoryEntry> {
        self.ctx.log().query(filter)
    }

    pub fn lineage(&self) -> &TokenLineageTracker {
        self.ctx.tracker()
    }

    pub fn node_state(&self, node_id: &str) -> Option<&NodeState> {
        self.scenario.node_index(node_id).map(|i| &self.states[i])
    }

    /// Current state of an FSM node
    pub fn fsm_state(&self, node_id: &str) -> Option<&str> {
        self.node_state(node_id).and_then(|s| s.fsm_state())
    }

    /// Tokens waiting in a node's inbox (back-edge deliveries)
    pub fn pending_deliveries(&self, node_id: &str) -> &[Delivery] {
        match self.scenario.node_index(node_id) {
            Some(i) => &self.inboxes[i],
            None => &[],
        }
    }

    /// Provenance graph rebuilt from the current log
    pub fn token_graph(&self) -> TokenGraph {
        TokenGraph::build_from_history(self.ctx.log().entries())
    }

    pub fn validate_integrity(&self) -> IntegrityReport {
        check_graph(&self.token_graph(), self.config.max_lineage_depth)
    }

    /// Paths between two tokens bounded by the configured depth
    pub fn find_token_paths(&self, from: &str, to: &str) -> Vec<Vec<String>> {
        self.token_graph()
            .find_all_paths(from, to, self.config.max_path_depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIPELINE: &str = r#"{
        "version": "1.0",
        "nodes": [
            {"type": "Sink", "nodeId": "bin"},
            {"type": "Queue", "nodeId": "window", "timeWindow": 3, "aggregationMethod": "sum", "destinationNodeId": "bin"},
            {"type": "DataSource", "nodeId": "src", "interval": 1, "sequence": [4, 160, 10], "destinationNodeId": "window"}
        ]
    }"#;

    fn engine() -> Engine {
        Engine::from_json(PIPELINE, EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_zero_tick_interval_rejected() {
        let config = EngineConfig {
            tick_interval: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            Engine::from_json(PIPELINE, config),
            Err(SimulationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_invalid_scenario_surfaces_errors() {
        let json = r#"{"version": "1.0", "nodes": [{"type": "Queue", "nodeId": "q"}]}"#;
        match Engine::from_json(json, EngineConfig::default()) {
            Err(SimulationError::Scenario(e)) => assert_eq!(e.validation_errors().len(), 3),
            other => panic!("expected scenario error, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_tick_advances_time() {
        let mut engine = engine();
        let result = engine.tick().unwrap();
        assert_eq!(result.tick, 1);
        assert_eq!(result.time, 1);
        assert_eq!(result.tokens_created, 1);
        assert_eq!(engine.current_time(), 1);
    }

    #[test]
    fn test_run_until_budget() {
        let mut engine = engine();
        let summary = engine
            .run_until(RunBudget {
                max_time: Some(10),
                ..RunBudget::default()
            })
            .unwrap();
        assert_eq!(summary.stop_reason, StopReason::TimeLimit);
        assert_eq!(summary.ticks_run, 10);
        assert_eq!(summary.tokens_created, 4);

        let summary = engine
            .run_until(RunBudget {
                max_ticks: Some(2),
                ..RunBudget::default()
            })
            .unwrap();
        assert_eq!(summary.stop_reason, StopReason::TickLimit);
        assert_eq!(engine.current_time(), 12);

        assert!(matches!(
            engine.run_until(RunBudget::default()),
            Err(SimulationError::UnboundedRun)
        ));
    }

    #[test]
    fn test_token_budget_stops_run() {
        let mut engine = engine();
        let summary = engine
            .run_until(RunBudget {
                max_tokens: Some(2),
                max_ticks: Some(100),
                ..RunBudget::default()
            })
            .unwrap();
        assert_eq!(summary.stop_reason, StopReason::TokenLimit);
        assert_eq!(summary.ticks_run, 2);
    }

    #[test]
    fn test_failed_tick_changes_nothing() {
        let mut engine = engine();
        engine.tick().unwrap();
        let entries = engine.activity_log().len();
        let pending = engine.inboxes.clone();

        let window = engine.scenario.node_index("window").unwrap();
        engine.states[window] = NodeState::Sink(Default::default());
        assert!(matches!(
            engine.tick(),
            Err(SimulationError::StateMismatch { node_id, .. }) if node_id == "window"
        ));
        assert_eq!(engine.current_time(), 1);
        assert_eq!(engine.tick_count(), 1);
        assert_eq!(engine.activity_log().len(), entries);
        assert_eq!(engine.tokens_created(), 1);
        assert_eq!(engine.inboxes, pending);
    }

    #[test]
    fn test_reset_clears_run() {
        let mut engine = engine();
        engine.run_ticks(5).unwrap();
        engine.reset();
        assert_eq!(engine.current_time(), 0);
        assert!(engine.activity_log().is_empty());
        assert!(engine.lineage().is_empty());
        assert_eq!(engine.tokens_created(), 0);
    }
}
