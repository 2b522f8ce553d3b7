// Scenario model - validated, closed node types
//
// Produced only by `validation::validate`. Every variant carries exactly the
// fields its kind needs, with formulas already parsed, so node runtimes never
// re-check optional fields at each access.

use crate::formula::Formula;
use crate::models::token::NodeId;
use crate::scenario::types::{AggregationMethod, NodeKind, ScenarioDef};
use std::collections::{BTreeMap, HashMap};

/// Identity shared by every node kind
#[derive(Debug, Clone, PartialEq)]
pub struct NodeMeta {
    pub node_id: NodeId,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataSourceNode {
    pub meta: NodeMeta,
    pub interval: u64,
    pub value_min: f64,
    pub value_max: f64,
    pub destination: NodeId,
    pub sequence: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueNode {
    pub meta: NodeMeta,
    pub time_window: u64,
    pub method: AggregationMethod,
    pub capacity: Option<usize>,
    pub destination: NodeId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessInput {
    pub name: String,
    pub source: NodeId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutput {
    pub name: String,
    pub formula: Formula,
    pub destination: NodeId,
}

impl ProcessOutput {
    /// Declared inputs this output's formula refers to
    pub fn required_inputs<'a>(&'a self, inputs: &'a [ProcessInput]) -> Vec<&'a str> {
        inputs
            .iter()
            .map(|i| i.name.as_str())
            .filter(|name| self.formula.bindings().contains(*name))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessNodeSpec {
    pub meta: NodeMeta,
    pub inputs: Vec<ProcessInput>,
    pub outputs: Vec<ProcessOutput>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: String,
    pub to: String,
    pub trigger: Option<String>,
    pub condition: Option<Formula>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FsmAction {
    Log { message: String },
    Emit { formula: Formula },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FsmDefinition {
    pub states: Vec<String>,
    pub transitions: Vec<Transition>,
    pub initial_state: String,
    pub on_entry: BTreeMap<String, Vec<FsmAction>>,
}

impl FsmDefinition {
    pub fn has_state(&self, state: &str) -> bool {
        self.states.iter().any(|s| s == state)
    }

    /// Transitions leaving `state`, in declared order
    pub fn transitions_from<'a>(&'a self, state: &'a str) -> impl Iterator<Item = &'a Transition> {
        self.transitions.iter().filter(move |t| t.from == state)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FsmNode {
    pub meta: NodeMeta,
    pub definition: FsmDefinition,
    pub destination: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub condition: Formula,
    pub destination: NodeId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiplexerNode {
    pub meta: NodeMeta,
    pub routes: Vec<Route>,
    pub default_destination: NodeId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SinkNode {
    pub meta: NodeMeta,
}

/// Validated node
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    DataSource(DataSourceNode),
    Queue(QueueNode),
    Process(ProcessNodeSpec),
    Fsm(FsmNode),
    Multiplexer(MultiplexerNode),
    Sink(SinkNode),
}

impl Node {
    pub fn meta(&self) -> &NodeMeta {
        match self {
            Node::DataSource(n) => &n.meta,
            Node::Queue(n) => &n.meta,
            Node::Process(n) => &n.meta,
            Node::Fsm(n) => &n.meta,
            Node::Multiplexer(n) => &n.meta,
            Node::Sink(n) => &n.meta,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.meta().node_id
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::DataSource(_) => NodeKind::DataSource,
            Node::Queue(_) => NodeKind::Queue,
            Node::Process(_) => NodeKind::ProcessNode,
            Node::Fsm(_) => NodeKind::Fsm,
            Node::Multiplexer(_) => NodeKind::StateMultiplexer,
            Node::Sink(_) => NodeKind::Sink,
        }
    }

    /// Outgoing edges (every node this one can deliver tokens to)
    pub fn destinations(&self) -> Vec<&str> {
        match self {
            Node::DataSource(n) => vec![n.destination.as_str()],
            Node::Queue(n) => vec![n.destination.as_str()],
            Node::Process(n) => n.outputs.iter().map(|o| o.destination.as_str()).collect(),
            Node::Fsm(n) => n.destination.iter().map(|d| d.as_str()).collect(),
            Node::Multiplexer(n) => n
                .routes
                .iter()
                .map(|r| r.destination.as_str())
                .chain(std::iter::once(n.default_destination.as_str()))
                .collect(),
            Node::Sink(_) => Vec::new(),
        }
    }

    /// Upstream nodes this node declares as inputs (ProcessNode only)
    pub fn declared_sources(&self) -> Vec<&str> {
        match self {
            Node::Process(n) => n.inputs.iter().map(|i| i.source.as_str()).collect(),
            _ => Vec::new(),
        }
    }
}

/// A scenario that passed validation; immutable input to the scheduler
#[derive(Debug, Clone)]
pub struct ValidScenario {
    definition: ScenarioDef,
    nodes: Vec<Node>,
    index: HashMap<NodeId, usize>,
    schedule: Vec<usize>,
}

impl ValidScenario {
    pub(crate) fn new(definition: ScenarioDef, nodes: Vec<Node>) -> Self {
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.node_id().to_string(), i))
            .collect::<HashMap<_, _>>();
        let schedule = compute_schedule(&nodes, &index);
        Self {
            definition,
            nodes,
            index,
            schedule,
        }
    }

    /// Source document (used for checkpoint hashing)
    pub fn definition(&self) -> &ScenarioDef {
        &self.definition
    }

    /// Nodes in declaration order
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.index.get(node_id).map(|&i| &self.nodes[i])
    }

    pub fn node_index(&self, node_id: &str) -> Option<usize> {
        self.index.get(node_id).copied()
    }

    /// Node indices in per-tick invocation order
    pub fn schedule(&self) -> &[usize] {
        &self.schedule
    }

    /// Node ids in per-tick invocation order
    pub fn schedule_ids(&self) -> Vec<&str> {
        self.schedule.iter().map(|&i| self.nodes[i].node_id()).collect()
    }
}

/// Producers-before-consumers order
///
/// Kahn's algorithm over the edge graph (destinations plus ProcessNode input
/// bindings), always taking the lowest declaration index among ready nodes.
/// Nodes left over on cycles are appended in declaration order; tokens they
/// send "backwards" are consumed on the next tick.
fn compute_schedule(nodes: &[Node], index: &HashMap<NodeId, usize>) -> Vec<usize> {
    use std::collections::{BTreeSet, HashSet};

    let n = nodes.len();
    let mut edges: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];

    for (from, node) in nodes.iter().enumerate() {
        for dest in node.destinations() {
            if let Some(&to) = index.get(dest) {
                if to != from {
                    edges[from].insert(to);
                }
            }
        }
        for source in node.declared_sources() {
            if let Some(&src) = index.get(source) {
                if src != from {
                    edges[src].insert(from);
                }
            }
        }
    }

    let mut in_degree = vec![0usize; n];
    for targets in &edges {
        for &to in targets {
            in_degree[to] += 1;
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    let mut placed = HashSet::new();

    while let Some(next) = ready.iter().next().copied() {
        ready.remove(&next);
        order.push(next);
        placed.insert(next);
        for &to in &edges[next] {
            in_degree[to] -= 1;
            if in_degree[to] == 0 {
                ready.insert(to);
            }
        }
    }

    order.extend((0..n).filter(|i| !placed.contains(i)));
    order
}
