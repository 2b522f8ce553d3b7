//! Node runtimes
//!
//! One module per node kind. Every runtime has the same shape:
//! `on_tick(&mut state, &spec, now, inbox, &mut RunContext) -> Vec<Emission>`.
//! State is plain serde data so an execution can be checkpointed between ticks.

pub mod context;
pub mod data_source;
pub mod fsm;
pub mod multiplexer;
pub mod process;
pub mod queue;
pub mod sink;

pub use context::{Delivery, Emission, RunContext};
pub use data_source::DataSourceState;
pub use fsm::{FsmState, Message};
pub use multiplexer::MultiplexerState;
pub use process::ProcessState;
pub use queue::{AggregationError, QueueState};
pub use sink::SinkState;

use crate::core::time::SimTime;
use crate::scenario::model::Node;
use crate::scenario::types::NodeKind;
use serde::{Deserialize, Serialize};

/// Runtime state of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NodeState {
    DataSource(DataSourceState),
    Queue(QueueState),
    ProcessNode(ProcessState),
    #[serde(rename = "FSM")]
    Fsm(FsmState),
    StateMultiplexer(MultiplexerState),
    Sink(SinkState),
}

impl NodeState {
    /// Fresh state for a node at `t = 0`
    pub fn initial(node: &Node) -> Self {
        match node {
            Node::DataSource(_) => NodeState::DataSource(DataSourceState::default()),
            Node::Queue(_) => NodeState::Queue(QueueState::default()),
            Node::Process(_) => NodeState::ProcessNode(ProcessState::default()),
            Node::Fsm(spec) => NodeState::Fsm(FsmState::new(spec)),
            Node::Multiplexer(_) => NodeState::StateMultiplexer(MultiplexerState::default()),
            Node::Sink(_) => NodeState::Sink(SinkState::default()),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            NodeState::DataSource(_) => NodeKind::DataSource,
            NodeState::Queue(_) => NodeKind::Queue,
            NodeState::ProcessNode(_) => NodeKind::ProcessNode,
            NodeState::Fsm(_) => NodeKind::Fsm,
            NodeState::StateMultiplexer(_) => NodeKind::StateMultiplexer,
            NodeState::Sink(_) => NodeKind::Sink,
        }
    }

    /// Run one tick of `node` against this state
    ///
    /// Returns `None` when the state belongs to a different node kind.
    pub fn on_tick(
        &mut self,
        node: &Node,
        now: SimTime,
        inbox: Vec<Delivery>,
        ctx: &mut RunContext,
    ) -> Option<Vec<Emission>> {
        let out = match (self, node) {
            (NodeState::DataSource(s), Node::DataSource(spec)) => s.on_tick(spec, now, inbox, ctx),
            (NodeState::Queue(s), Node::Queue(spec)) => s.on_tick(spec, now, inbox, ctx),
            (NodeState::ProcessNode(s), Node::Process(spec)) => s.on_tick(spec, now, inbox, ctx),
            (NodeState::Fsm(s), Node::Fsm(spec)) => s.on_tick(spec, now, inbox, ctx),
            (NodeState::StateMultiplexer(s), Node::Multiplexer(spec)) => s.on_tick(spec, now, inbox, ctx),
            (NodeState::Sink(s), Node::Sink(spec)) => s.on_tick(spec, now, inbox, ctx),
            _ => return None,
        };
        Some(out)
    }

    /// Current FSM state name, for FSM nodes
    pub fn fsm_state(&self) -> Option<&str> {
        match self {
            NodeState::Fsm(s) => Some(&s.current_state),
            _ => None,
        }
    }
}
