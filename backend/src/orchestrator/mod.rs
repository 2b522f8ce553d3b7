//! Orchestrator - main simulation loop
//!
//! - engine.rs: tick loop, run budgets, queries
//! - checkpoint.rs: snapshot/restore with scenario hash matching
//! - store.rs: execution store and template source collaborators

pub mod checkpoint;
pub mod engine;
pub mod store;

pub use engine::{
    Engine, EngineConfig, RunBudget, RunSummary, SimulationError, StopReason, TickResult,
};

pub use checkpoint::{compute_scenario_hash, ExecutionState};
pub use store::{
    ExecutionId, ExecutionStore, InMemoryExecutionStore, InMemoryTemplates, TemplateSource,
};
