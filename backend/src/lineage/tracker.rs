//! Live token lineage registry
//!
//! Owned by one run's context and populated by the node runtimes as tokens
//! are created and consumed. Keeps child→parents and parent→children adjacency
//! plus a [`TokenLineageNode`] per token id.
//!
//! # Critical Invariants
//!
//! 1. `depth = 0` iff the token has no parents, else `1 + max(parent depth)`
//!    (parents the tracker has never seen count as depth 0)
//! 2. Traversals never recurse and never revisit a token, so malformed
//!    (cyclic) parent data cannot cause non-termination
//! 3. `clear_all` empties every map in one step; there is no partial reset

use crate::core::time::SimTime;
use crate::models::history::HistoryAction;
use crate::models::token::{NodeId, Token, TokenId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// How a token came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineageType {
    Source,
    Transformed,
    Aggregated,
    Split,
    Consumed,
}

impl LineageType {
    /// Classification at creation time
    pub fn classify(parent_count: usize, action: HistoryAction) -> Self {
        if action == HistoryAction::Split {
            return LineageType::Split;
        }
        match parent_count {
            0 => LineageType::Source,
            1 => LineageType::Transformed,
            _ => LineageType::Aggregated,
        }
    }
}

/// Lineage record for one token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenLineageNode {
    pub token_id: TokenId,
    pub value: serde_json::Value,
    pub node_id: NodeId,
    pub node_name: String,
    pub timestamp: SimTime,
    pub action: HistoryAction,
    pub parent_tokens: Vec<TokenId>,
    pub child_tokens: Vec<TokenId>,
    pub depth: u32,
    pub lineage_type: LineageType,
    /// Position in registration order (ties between equal timestamps)
    pub registration_order: u64,
}

/// Parent/child registry for one simulation run
#[derive(Debug, Clone, Default)]
pub struct TokenLineageTracker {
    nodes: HashMap<TokenId, TokenLineageNode>,
    parents: HashMap<TokenId, Vec<TokenId>>,
    children: HashMap<TokenId, Vec<TokenId>>,
    registered: u64,
}

impl TokenLineageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly created token
    ///
    /// Parents are taken from the token itself. Re-registering an id that is
    /// already known is ignored (the first registration wins).
    pub fn register_token(
        &mut self,
        token: &Token,
        node_name: &str,
        action: HistoryAction,
    ) -> Option<&TokenLineageNode> {
        let token_id = token.id().to_string();
        if self.nodes.contains_key(&token_id) {
            warn!(token_id = %token_id, "token registered twice; keeping first registration");
            return None;
        }

        let parents = token.parent_token_ids().to_vec();
        let depth = if parents.is_empty() {
            0
        } else {
            1 + parents
                .iter()
                .map(|p| self.nodes.get(p).map_or(0, |n| n.depth))
                .max()
                .unwrap_or(0)
        };

        for parent in &parents {
            let siblings = self.children.entry(parent.clone()).or_default();
            if !siblings.contains(&token_id) {
                siblings.push(token_id.clone());
            }
            if let Some(parent_node) = self.nodes.get_mut(parent) {
                if !parent_node.child_tokens.contains(&token_id) {
                    parent_node.child_tokens.push(token_id.clone());
                }
            }
        }

        // Children may have been registered before this token (malformed order)
        let child_tokens = self.children.get(&token_id).cloned().unwrap_or_default();

        self.registered += 1;
        let node = TokenLineageNode {
            token_id: token_id.clone(),
            value: token.value().clone(),
            node_id: token.origin_node_id().to_string(),
            node_name: node_name.to_string(),
            timestamp: token.created_at(),
            action,
            lineage_type: LineageType::classify(parents.len(), action),
            parent_tokens: parents.clone(),
            child_tokens,
            depth,
            registration_order: self.registered,
        };
        self.parents.insert(token_id.clone(), parents);
        self.nodes.insert(token_id.clone(), node);
        self.nodes.get(&token_id)
    }

    /// Mark a token as consumed by a sink; false if the token is unknown
    pub fn mark_consumed(&mut self, token_id: &str) -> bool {
        match self.nodes.get_mut(token_id) {
            Some(node) => {
                node.lineage_type = LineageType::Consumed;
                true
            }
            None => false,
        }
    }

    pub fn get_lineage(&self, token_id: &str) -> Option<&TokenLineageNode> {
        self.nodes.get(token_id)
    }

    /// All transitive parents, oldest first
    pub fn get_ancestors(&self, token_id: &str) -> Vec<&TokenLineageNode> {
        self.collect_reachable(token_id, &self.parents)
    }

    /// All transitive children, oldest first
    pub fn get_descendants(&self, token_id: &str) -> Vec<&TokenLineageNode> {
        self.collect_reachable(token_id, &self.children)
    }

    /// Other tokens with the same timestamp and the same parent set
    pub fn get_siblings(&self, token_id: &str) -> Vec<&TokenLineageNode> {
        let target = match self.nodes.get(token_id) {
            Some(node) => node,
            None => return Vec::new(),
        };
        let target_parents: HashSet<&TokenId> = target.parent_tokens.iter().collect();

        let mut siblings: Vec<&TokenLineageNode> = self
            .nodes
            .values()
            .filter(|n| n.token_id != target.token_id && n.timestamp == target.timestamp)
            .filter(|n| n.parent_tokens.iter().collect::<HashSet<_>>() == target_parents)
            .collect();
        siblings.sort_by_key(|n| n.registration_order);
        siblings
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every lineage node in registration order
    pub fn nodes(&self) -> Vec<&TokenLineageNode> {
        let mut nodes: Vec<_> = self.nodes.values().collect();
        nodes.sort_by_key(|n| n.registration_order);
        nodes
    }

    /// Empty all maps at once
    pub fn clear_all(&mut self) {
        *self = Self::default();
    }

    fn collect_reachable(
        &self,
        start: &str,
        edges: &HashMap<TokenId, Vec<TokenId>>,
    ) -> Vec<&TokenLineageNode> {
        let mut visited: HashSet<&str> = HashSet::new();
        visited.insert(start);
        let mut stack: Vec<&str> = vec![start];
        let mut found = Vec::new();

        while let Some(current) = stack.pop() {
            for next in edges.get(current).into_iter().flatten() {
                if visited.insert(next.as_str()) {
                    if let Some(node) = self.nodes.get(next) {
                        found.push(node);
                    }
                    stack.push(next.as_str());
                }
            }
        }

        found.sort_by_key(|n| (n.timestamp, n.registration_order));
        found
    }
}
