// Scenario description - wire types
//
// The versioned JSON "workflow protocol" document: `{version, nodes[]}` where
// each node is tagged by `type`. Required fields are deserialized as optional
// here so a missing field becomes a validation error (reported together with
// every other problem) instead of aborting deserialization at the first gap.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Only supported protocol version
pub const SCENARIO_VERSION: &str = "1.0";

/// Root scenario document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioDef {
    pub version: String,

    #[serde(default)]
    pub nodes: Vec<NodeDef>,
}

impl ScenarioDef {
    /// Parse a scenario document from JSON text
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// One node of the scenario graph, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NodeDef {
    DataSource(DataSourceDef),
    Queue(QueueDef),
    ProcessNode(ProcessNodeDef),
    #[serde(rename = "FSM")]
    Fsm(FsmNodeDef),
    StateMultiplexer(MultiplexerDef),
    Sink(SinkDef),
}

impl NodeDef {
    pub fn node_id(&self) -> Option<&str> {
        match self {
            NodeDef::DataSource(d) => d.node_id.as_deref(),
            NodeDef::Queue(d) => d.node_id.as_deref(),
            NodeDef::ProcessNode(d) => d.node_id.as_deref(),
            NodeDef::Fsm(d) => d.node_id.as_deref(),
            NodeDef::StateMultiplexer(d) => d.node_id.as_deref(),
            NodeDef::Sink(d) => d.node_id.as_deref(),
        }
    }

    pub fn display_name(&self) -> Option<&str> {
        match self {
            NodeDef::DataSource(d) => d.display_name.as_deref(),
            NodeDef::Queue(d) => d.display_name.as_deref(),
            NodeDef::ProcessNode(d) => d.display_name.as_deref(),
            NodeDef::Fsm(d) => d.display_name.as_deref(),
            NodeDef::StateMultiplexer(d) => d.display_name.as_deref(),
            NodeDef::Sink(d) => d.display_name.as_deref(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            NodeDef::DataSource(_) => NodeKind::DataSource,
            NodeDef::Queue(_) => NodeKind::Queue,
            NodeDef::ProcessNode(_) => NodeKind::ProcessNode,
            NodeDef::Fsm(_) => NodeKind::Fsm,
            NodeDef::StateMultiplexer(_) => NodeKind::StateMultiplexer,
            NodeDef::Sink(_) => NodeKind::Sink,
        }
    }
}

/// Node kind discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    DataSource,
    Queue,
    ProcessNode,
    #[serde(rename = "FSM")]
    Fsm,
    StateMultiplexer,
    Sink,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::DataSource => "DataSource",
            NodeKind::Queue => "Queue",
            NodeKind::ProcessNode => "ProcessNode",
            NodeKind::Fsm => "FSM",
            NodeKind::StateMultiplexer => "StateMultiplexer",
            NodeKind::Sink => "Sink",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceDef {
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Emission interval in simulated time units
    #[serde(default)]
    pub interval: Option<u64>,
    #[serde(default)]
    pub value_min: Option<f64>,
    #[serde(default)]
    pub value_max: Option<f64>,
    #[serde(default)]
    pub destination_node_id: Option<String>,
    /// Scripted values emitted in order instead of random samples
    #[serde(default)]
    pub sequence: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDef {
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub time_window: Option<u64>,
    #[serde(default)]
    pub aggregation_method: Option<String>,
    #[serde(default)]
    pub capacity: Option<usize>,
    #[serde(default)]
    pub destination_node_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessNodeDef {
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub inputs: Vec<InputDef>,
    #[serde(default)]
    pub outputs: Vec<OutputDef>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputDef {
    #[serde(default)]
    pub name: Option<String>,
    /// Upstream node feeding this input
    #[serde(default)]
    pub node_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputDef {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub formula: Option<String>,
    #[serde(default)]
    pub destination_node_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsmNodeDef {
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub fsm: Option<FsmDefinitionDef>,
    #[serde(default)]
    pub destination_node_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsmDefinitionDef {
    #[serde(default)]
    pub states: Vec<String>,
    #[serde(default)]
    pub transitions: Vec<TransitionDef>,
    #[serde(default)]
    pub initial_state: Option<String>,
    /// State name → actions run on entering that state
    #[serde(default)]
    pub on_entry: BTreeMap<String, Vec<FsmActionDef>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionDef {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub trigger: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum FsmActionDef {
    Log { message: String },
    Emit { formula: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiplexerDef {
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub routes: Vec<RouteDef>,
    #[serde(default)]
    pub default_route: Option<DefaultRouteDef>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDef {
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub destination_node_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultRouteDef {
    #[serde(default)]
    pub destination_node_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkDef {
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Queue aggregation method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMethod {
    Sum,
    Average,
    Count,
    First,
    Last,
}

impl AggregationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationMethod::Sum => "sum",
            AggregationMethod::Average => "average",
            AggregationMethod::Count => "count",
            AggregationMethod::First => "first",
            AggregationMethod::Last => "last",
        }
    }
}

impl FromStr for AggregationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sum" => Ok(AggregationMethod::Sum),
            "average" => Ok(AggregationMethod::Average),
            "count" => Ok(AggregationMethod::Count),
            "first" => Ok(AggregationMethod::First),
            "last" => Ok(AggregationMethod::Last),
            other => Err(other.to_string()),
        }
    }
}
