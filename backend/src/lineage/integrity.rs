//! Provenance integrity checks
//!
//! Errors mean the log cannot describe a valid provenance DAG; warnings are
//! performance or hygiene signals. Neither stops a traversal: every graph
//! query stays safe on malformed data.

use crate::lineage::graph::TokenGraph;
use crate::models::history::HistoryEntry;
use crate::models::token::TokenId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Default depth above which a lineage chain is reported
pub const DEFAULT_MAX_LINEAGE_DEPTH: usize = 100;

#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum IntegrityIssue {
    #[error("Cycle in token lineage: {}", .tokens.join(" -> "))]
    Cycle { tokens: Vec<TokenId> },

    #[error("Token {token_id} declares parent {missing_parent_id} which was never created")]
    DanglingParent {
        token_id: TokenId,
        missing_parent_id: TokenId,
    },

    #[error("No root token among {token_count} tokens")]
    NoRootTokens { token_count: usize },

    #[error("Token {token_id} has lineage depth {depth} (threshold {threshold})")]
    ExcessiveDepth {
        token_id: TokenId,
        depth: usize,
        threshold: usize,
    },

    #[error("Token {token_id} was created more than once")]
    DuplicateCreation { token_id: TokenId },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub errors: Vec<IntegrityIssue>,
    pub warnings: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Check the provenance recorded in `entries`
pub fn validate_integrity(entries: &[HistoryEntry], max_lineage_depth: usize) -> IntegrityReport {
    let graph = TokenGraph::build_from_history(entries);
    check_graph(&graph, max_lineage_depth)
}

/// Same checks against an already built graph
pub fn check_graph(graph: &TokenGraph, max_lineage_depth: usize) -> IntegrityReport {
    let mut report = IntegrityReport::default();

    for tokens in graph.detect_cycles() {
        report.errors.push(IntegrityIssue::Cycle { tokens });
    }

    for dangling in graph.dangling_references() {
        report.errors.push(IntegrityIssue::DanglingParent {
            token_id: dangling.token_id.clone(),
            missing_parent_id: dangling.missing_parent_id.clone(),
        });
    }

    if graph.token_count() > 0 && graph.find_root_tokens().is_empty() {
        report.errors.push(IntegrityIssue::NoRootTokens {
            token_count: graph.token_count(),
        });
    }

    let depths = graph.depths();
    for vertex in graph.vertices() {
        if let Some(&depth) = depths.get(vertex.token_id.as_str()) {
            if depth > max_lineage_depth {
                report.warnings.push(IntegrityIssue::ExcessiveDepth {
                    token_id: vertex.token_id.clone(),
                    depth,
                    threshold: max_lineage_depth,
                });
            }
        }
    }

    for token_id in graph.duplicate_creations() {
        report.warnings.push(IntegrityIssue::DuplicateCreation {
            token_id: token_id.clone(),
        });
    }

    if !report.is_valid() {
        warn!(
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "token lineage failed integrity check"
        );
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::SimTime;
    use crate::models::history::{ActivityLog, EntryDraft, HistoryAction};

    fn entries(tokens: &[(&str, &[&str])]) -> Vec<HistoryEntry> {
        let mut log = ActivityLog::new();
        for (t, (id, parents)) in tokens.iter().enumerate() {
            log.append(
                EntryDraft::new("n", HistoryAction::Created)
                    .at(t as SimTime, 0)
                    .token(*id)
                    .sources(parents.iter().map(|p| p.to_string()).collect()),
            );
        }
        log.entries().to_vec()
    }

    #[test]
    fn test_clean_lineage() {
        let report = validate_integrity(&entries(&[("a", &[]), ("b", &["a"])]), 10);
        assert!(report.is_valid());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_empty_log_is_valid() {
        assert!(validate_integrity(&[], 10).is_valid());
    }

    #[test]
    fn test_cycle_and_missing_root() {
        let report = validate_integrity(&entries(&[("a", &["b"]), ("b", &["a"])]), 10);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, IntegrityIssue::Cycle { .. })));
        assert!(report
            .errors
            .contains(&IntegrityIssue::NoRootTokens { token_count: 2 }));
    }

    #[test]
    fn test_dangling_parent() {
        let report = validate_integrity(&entries(&[("a", &[]), ("b", &["nowhere"])]), 10);
        assert_eq!(
            report.errors,
            vec![IntegrityIssue::DanglingParent {
                token_id: "b".into(),
                missing_parent_id: "nowhere".into()
            }]
        );
    }

    #[test]
    fn test_depth_warning() {
        let report = validate_integrity(
            &entries(&[("a", &[]), ("b", &["a"]), ("c", &["b"]), ("d", &["c"])]),
            2,
        );
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(
            report.warnings[0],
            IntegrityIssue::ExcessiveDepth {
                token_id: "d".into(),
                depth: 3,
                threshold: 2
            }
        );
    }
}
