//! Token provenance graph built from the activity log
//!
//! The graph is rebuilt on demand from history entries (never from live
//! tracker state), so it can analyze a replayed or restored run just as well
//! as a live one.
//!
//! Key features:
//! - Vertices indexed in creation (sequence) order
//! - Edges `parent → child` for every declared `sourceTokenIds` reference
//! - Declared parents with no creation entry are kept as dangling references
//! - Every traversal is iterative with a visited guard, so cyclic input data
//!   cannot recurse without bound

use crate::core::time::SimTime;
use crate::models::history::{HistoryAction, HistoryEntry};
use crate::models::token::{NodeId, TokenId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// Default guard for [`TokenGraph::find_all_paths`]
pub const DEFAULT_MAX_PATH_DEPTH: usize = 32;

// ============================================================================
// Graph Types
// ============================================================================

/// One token vertex
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenVertex {
    pub token_id: TokenId,
    pub node_id: NodeId,
    pub timestamp: SimTime,
    /// Sequence of the creation entry
    pub sequence: u64,
    pub action: HistoryAction,
    pub value: Option<serde_json::Value>,
}

/// Declared parent id with no creation entry in the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DanglingReference {
    pub token_id: TokenId,
    pub missing_parent_id: TokenId,
}

/// Ordered token ids from a back-edge target around to the edge's source
pub type Cycle = Vec<TokenId>;

/// Directed path of token ids
pub type Path = Vec<TokenId>;

/// Summary counts for a graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphStatistics {
    pub token_count: usize,
    pub edge_count: usize,
    pub root_count: usize,
    pub leaf_count: usize,
    pub dangling_count: usize,
    /// Longest parent chain over the acyclic part of the graph
    pub max_depth: usize,
}

/// Provenance graph of every token creation in a log
#[derive(Debug, Clone, Default)]
pub struct TokenGraph {
    vertices: Vec<TokenVertex>,
    index: HashMap<TokenId, usize>,
    /// child index → parent indices (resolved references only)
    parents: Vec<Vec<usize>>,
    /// parent index → child indices
    children: Vec<Vec<usize>>,
    dangling: Vec<DanglingReference>,
    /// Token ids with more than one creation entry
    duplicates: Vec<TokenId>,
}

impl TokenGraph {
    /// Build from history entries (any order; creation entries are sorted by sequence)
    pub fn build_from_history(entries: &[HistoryEntry]) -> Self {
        let mut graph = Self::default();

        let mut creations: Vec<&HistoryEntry> = entries
            .iter()
            .filter(|e| e.action.is_token_creation() && e.token_id.is_some())
            .collect();
        creations.sort_by_key(|e| e.sequence);

        // Phase 1: vertices
        let mut declared: Vec<&[TokenId]> = Vec::new();
        for entry in creations {
            let token_id = match &entry.token_id {
                Some(id) => id,
                None => continue,
            };
            if graph.index.contains_key(token_id) {
                if !graph.duplicates.contains(token_id) {
                    graph.duplicates.push(token_id.clone());
                }
                continue;
            }
            graph.index.insert(token_id.clone(), graph.vertices.len());
            graph.vertices.push(TokenVertex {
                token_id: token_id.clone(),
                node_id: entry.node_id.clone(),
                timestamp: entry.timestamp,
                sequence: entry.sequence,
                action: entry.action,
                value: entry.value.clone(),
            });
            declared.push(&entry.source_token_ids);
        }

        // Phase 2: edges (parents may be created after their children in malformed logs)
        let n = graph.vertices.len();
        graph.parents = vec![Vec::new(); n];
        graph.children = vec![Vec::new(); n];
        for (child, sources) in declared.into_iter().enumerate() {
            for parent_id in sources {
                match graph.index.get(parent_id) {
                    Some(&parent) => {
                        if !graph.parents[child].contains(&parent) {
                            graph.parents[child].push(parent);
                            graph.children[parent].push(child);
                        }
                    }
                    None => graph.dangling.push(DanglingReference {
                        token_id: graph.vertices[child].token_id.clone(),
                        missing_parent_id: parent_id.clone(),
                    }),
                }
            }
        }

        graph
    }

    pub fn token_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.parents.iter().map(|p| p.len()).sum()
    }

    pub fn contains(&self, token_id: &str) -> bool {
        self.index.contains_key(token_id)
    }

    pub fn vertex(&self, token_id: &str) -> Option<&TokenVertex> {
        self.index.get(token_id).map(|&i| &self.vertices[i])
    }

    /// Vertices in creation order
    pub fn vertices(&self) -> &[TokenVertex] {
        &self.vertices
    }

    pub fn parents_of(&self, token_id: &str) -> Vec<&str> {
        self.neighbors(token_id, &self.parents)
    }

    pub fn children_of(&self, token_id: &str) -> Vec<&str> {
        self.neighbors(token_id, &self.children)
    }

    pub fn dangling_references(&self) -> &[DanglingReference] {
        &self.dangling
    }

    pub fn duplicate_creations(&self) -> &[TokenId] {
        &self.duplicates
    }

    fn neighbors(&self, token_id: &str, edges: &[Vec<usize>]) -> Vec<&str> {
        match self.index.get(token_id) {
            Some(&i) => edges[i]
                .iter()
                .map(|&j| self.vertices[j].token_id.as_str())
                .collect(),
            None => Vec::new(),
        }
    }

    fn ids(&self, indices: impl IntoIterator<Item = usize>) -> Vec<TokenId> {
        indices
            .into_iter()
            .map(|i| self.vertices[i].token_id.clone())
            .collect()
    }

    // ========================================================================
    // Cycle Detection
    // ========================================================================

    /// Cycles found by a three-colour DFS along parent → child edges
    ///
    /// Each cycle lists token ids from the back-edge target (an ancestor still
    /// on the DFS path) down to the edge's source. A back edge whose path
    /// overlaps an already reported cycle is skipped, so every token appears
    /// in at most one cycle and the whole pass stays O(V+E).
    pub fn detect_cycles(&self) -> Vec<Cycle> {
        #[derive(Clone, Copy, PartialEq)]
        enum Colour {
            White,
            Gray,
            Black,
        }

        let n = self.vertices.len();
        let mut colour = vec![Colour::White; n];
        // Position on the DFS path while gray
        let mut depth_of = vec![0usize; n];
        let mut cycles = Vec::new();

        for start in 0..n {
            if colour[start] != Colour::White {
                continue;
            }
            // (vertex, next child position); the stack is the gray path
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
            colour[start] = Colour::Gray;
            depth_of[start] = 0;
            // Reported path segments as inclusive (from, to) positions, disjoint
            // and ascending, clipped to the current path
            let mut claimed: Vec<(usize, usize)> = Vec::new();

            while let Some(top) = stack.last_mut() {
                let v = top.0;
                if top.1 < self.children[v].len() {
                    let w = self.children[v][top.1];
                    top.1 += 1;
                    match colour[w] {
                        Colour::White => {
                            colour[w] = Colour::Gray;
                            depth_of[w] = stack.len();
                            stack.push((w, 0));
                        }
                        Colour::Gray => {
                            let from = depth_of[w];
                            let overlaps = claimed.last().map_or(false, |&(_, to)| to >= from);
                            if !overlaps {
                                cycles.push(self.ids(stack[from..].iter().map(|&(u, _)| u)));
                                claimed.push((from, stack.len() - 1));
                            }
                        }
                        Colour::Black => {}
                    }
                } else {
                    colour[v] = Colour::Black;
                    stack.pop();
                    let len = stack.len();
                    while claimed.last().map_or(false, |&(from, _)| from >= len) {
                        claimed.pop();
                    }
                    if let Some(last) = claimed.last_mut() {
                        last.1 = last.1.min(len.saturating_sub(1));
                    }
                }
            }
        }

        cycles
    }

    pub fn has_cycles(&self) -> bool {
        !self.detect_cycles().is_empty()
    }

    // ========================================================================
    // Ancestry Traversal
    // ========================================================================

    /// Depth-first walk over parent edges; preorder, start token excluded
    pub fn dfs_ancestry_traversal(&self, token_id: &str) -> Vec<TokenId> {
        let start = match self.index.get(token_id) {
            Some(&i) => i,
            None => return Vec::new(),
        };
        let mut visited = vec![false; self.vertices.len()];
        visited[start] = true;
        let mut order = Vec::new();

        // Reverse push keeps declared parent order in the preorder
        let mut stack: Vec<usize> = self.parents[start].iter().rev().copied().collect();
        while let Some(v) = stack.pop() {
            if visited[v] {
                continue;
            }
            visited[v] = true;
            order.push(v);
            stack.extend(self.parents[v].iter().rev().filter(|&&p| !visited[p]));
        }

        self.ids(order)
    }

    /// Ancestors grouped by hop distance; generation 1 holds the parents
    pub fn bfs_ancestry_by_generation(&self, token_id: &str) -> BTreeMap<usize, Vec<TokenId>> {
        let mut generations = BTreeMap::new();
        let start = match self.index.get(token_id) {
            Some(&i) => i,
            None => return generations,
        };
        let mut visited = vec![false; self.vertices.len()];
        visited[start] = true;
        let mut queue = VecDeque::from([(start, 0usize)]);

        while let Some((v, generation)) = queue.pop_front() {
            for &p in &self.parents[v] {
                if !visited[p] {
                    visited[p] = true;
                    generations
                        .entry(generation + 1)
                        .or_insert_with(Vec::new)
                        .push(self.vertices[p].token_id.clone());
                    queue.push_back((p, generation + 1));
                }
            }
        }

        generations
    }

    /// Tokens with no resolved parent
    pub fn find_root_tokens(&self) -> Vec<TokenId> {
        self.ids((0..self.vertices.len()).filter(|&i| self.parents[i].is_empty()))
    }

    /// Tokens nothing was derived from
    pub fn find_leaf_tokens(&self) -> Vec<TokenId> {
        self.ids((0..self.vertices.len()).filter(|&i| self.children[i].is_empty()))
    }

    /// Simple directed paths `from → … → to` along parent → child edges
    ///
    /// Paths longer than `max_depth` edges are not explored.
    pub fn find_all_paths(&self, from: &str, to: &str, max_depth: usize) -> Vec<Path> {
        let (start, target) = match (self.index.get(from), self.index.get(to)) {
            (Some(&s), Some(&t)) => (s, t),
            _ => return Vec::new(),
        };
        if start == target {
            return vec![vec![from.to_string()]];
        }

        let mut paths = Vec::new();
        let mut on_path = vec![false; self.vertices.len()];
        let mut path = vec![start];
        on_path[start] = true;
        let mut cursors = vec![0usize];

        while let Some(cursor) = cursors.last_mut() {
            let v = path[path.len() - 1];
            if *cursor >= self.children[v].len() || path.len() > max_depth {
                cursors.pop();
                on_path[v] = false;
                path.pop();
                continue;
            }
            let w = self.children[v][*cursor];
            *cursor += 1;
            if on_path[w] {
                continue;
            }
            if w == target {
                let mut found = path.clone();
                found.push(w);
                paths.push(self.ids(found));
            } else {
                on_path[w] = true;
                path.push(w);
                cursors.push(0);
            }
        }

        paths
    }

    // ========================================================================
    // Depth
    // ========================================================================

    /// Longest parent chain per token (Kahn order over the acyclic part)
    ///
    /// Tokens on or downstream of a cycle are not assigned a depth.
    pub fn depths(&self) -> HashMap<&str, usize> {
        let n = self.vertices.len();
        let mut in_degree: Vec<usize> = self.parents.iter().map(|p| p.len()).collect();
        let mut depth = vec![0usize; n];
        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut done = HashSet::new();

        while let Some(v) = queue.pop_front() {
            done.insert(v);
            for &c in &self.children[v] {
                depth[c] = depth[c].max(depth[v] + 1);
                in_degree[c] -= 1;
                if in_degree[c] == 0 {
                    queue.push_back(c);
                }
            }
        }

        done.into_iter()
            .map(|i| (self.vertices[i].token_id.as_str(), depth[i]))
            .collect()
    }

    pub fn statistics(&self) -> GraphStatistics {
        GraphStatistics {
            token_count: self.token_count(),
            edge_count: self.edge_count(),
            root_count: self.find_root_tokens().len(),
            leaf_count: self.find_leaf_tokens().len(),
            dangling_count: self.dangling.len(),
            max_depth: self.depths().values().copied().max().unwrap_or(0),
        }
    }
}
