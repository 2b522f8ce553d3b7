//! Token provenance
//!
//! - tracker.rs: live parent/child registry populated during a run
//! - graph.rs: on-demand graph rebuilt from the activity log
//! - integrity.rs: cycle, dangling-reference and depth checks over that graph

pub mod graph;
pub mod integrity;
pub mod tracker;

pub use graph::{Cycle, DanglingReference, GraphStatistics, Path, TokenGraph, TokenVertex, DEFAULT_MAX_PATH_DEPTH};
pub use integrity::{check_graph, validate_integrity, IntegrityIssue, IntegrityReport, DEFAULT_MAX_LINEAGE_DEPTH};
pub use tracker::{LineageType, TokenLineageNode, TokenLineageTracker};
