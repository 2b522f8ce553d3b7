//! Workflow Simulator Core - Rust Engine
//!
//! Discrete-time workflow simulation with token provenance tracking.
//!
//! # Architecture
//!
//! - **core**: Simulated and wall-clock time
//! - **scenario**: Scenario document, validation, validated node model
//! - **formula**: Parse-once expression language for outputs, conditions, routes
//! - **models**: Domain types (Token, HistoryEntry, ActivityLog)
//! - **runtime**: Per-kind node runtimes and the per-run context
//! - **lineage**: Live lineage tracker and log-derived provenance graph
//! - **orchestrator**: Main simulation loop, checkpoints, storage traits
//! - **rng**: Deterministic random number generation
//!
//! # Critical Invariants
//!
//! 1. All randomness is deterministic (seeded RNG)
//! 2. History sequences are strictly increasing; the log is append-only
//! 3. Run state lives in one engine; there are no global registries

// Module declarations
pub mod core;
pub mod formula;
pub mod lineage;
pub mod models;
pub mod orchestrator;
pub mod rng;
pub mod runtime;
pub mod scenario;

// Re-exports for convenience
pub use crate::core::time::{SimClock, SimTime, WallClock};
pub use lineage::{
    validate_integrity, IntegrityIssue, IntegrityReport, LineageType, TokenGraph,
    TokenLineageNode, TokenLineageTracker,
};
pub use models::{
    history::{ActivityLog, HistoryAction, HistoryEntry, HistoryFilter},
    token::{Token, TokenId},
};
pub use orchestrator::{
    Engine, EngineConfig, ExecutionId, ExecutionState, ExecutionStore, InMemoryExecutionStore,
    InMemoryTemplates, RunBudget, RunSummary, SimulationError, StopReason, TemplateSource,
    TickResult,
};
pub use rng::SeededRng;
pub use scenario::{load_scenario, validate, ScenarioDef, ScenarioError, ValidScenario, ValidationError};
