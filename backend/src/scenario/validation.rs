// Scenario validation
//
// Converts a wire-level `ScenarioDef` into a `ValidScenario`. All checks run
// to completion and every violation is returned, so a scenario author can fix
// everything in one pass:
// - Protocol version
// - Node id presence and uniqueness
// - Required fields per node kind
// - Numeric ranges (valueMin <= valueMax, positive intervals/windows/capacity)
// - Cross-references (destinations, ProcessNode inputs)
// - DataSource nodes are never destinations
// - Formula syntax (parsed once here, evaluated many times at runtime)
// - FSM state references

use crate::formula::{parse_formula, Formula, ParseError};
use crate::scenario::model::{
    DataSourceNode, FsmAction, FsmDefinition, FsmNode, MultiplexerNode, Node, NodeMeta,
    ProcessInput, ProcessNodeSpec, ProcessOutput, QueueNode, Route, SinkNode, Transition,
    ValidScenario,
};
use crate::scenario::types::{
    AggregationMethod, DataSourceDef, FsmActionDef, FsmNodeDef, MultiplexerDef, NodeDef,
    NodeKind, ProcessNodeDef, QueueDef, ScenarioDef, SCENARIO_VERSION,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

/// Scenario validation errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Unsupported scenario version '{found}', expected '{expected}'")]
    UnsupportedVersion { found: String, expected: String },

    #[error("Node at position {0} has no nodeId")]
    MissingNodeId(usize),

    #[error("Duplicate node ID: {0}")]
    DuplicateNodeId(String),

    #[error("Node '{node_id}' is missing required field '{field}'")]
    MissingField { node_id: String, field: String },

    #[error("Node '{node_id}' has invalid {field}: {reason}")]
    InvalidRange {
        node_id: String,
        field: String,
        reason: String,
    },

    #[error("Node '{node_id}' field '{field}' references unknown node '{target}'")]
    DanglingReference {
        node_id: String,
        field: String,
        target: String,
    },

    #[error("Node '{node_id}' field '{field}' targets '{target}', a {kind} which accepts no input")]
    InvalidDestination {
        node_id: String,
        field: String,
        target: String,
        kind: NodeKind,
    },

    #[error("Node '{node_id}' has unknown aggregation method '{method}'")]
    UnknownAggregationMethod { node_id: String, method: String },

    #[error("Node '{node_id}' field '{field}' has invalid formula: {error}")]
    InvalidFormula {
        node_id: String,
        field: String,
        error: ParseError,
    },

    #[error("Node '{node_id}' field '{field}' references undeclared state '{state}'")]
    UnknownState {
        node_id: String,
        field: String,
        state: String,
    },
}

/// Validation result
pub type ValidationResult = Result<ValidScenario, Vec<ValidationError>>;

/// Validate a scenario document
///
/// # Example
///
/// ```rust
/// use workflow_simulator_core_rs::scenario::{validate, ScenarioDef};
///
/// let json = r#"{
///   "version": "1.0",
///   "nodes": [
///     {"type": "DataSource", "nodeId": "src", "interval": 1, "valueMin": 1, "valueMax": 6, "destinationNodeId": "ghost"}
///   ]
/// }"#;
/// let scenario = ScenarioDef::from_json(json).unwrap();
/// let errors = validate(scenario).unwrap_err();
/// assert_eq!(errors.len(), 1);
/// ```
pub fn validate(scenario: ScenarioDef) -> ValidationResult {
    let mut errors = Vec::new();

    if scenario.version != SCENARIO_VERSION {
        errors.push(ValidationError::UnsupportedVersion {
            found: scenario.version.clone(),
            expected: SCENARIO_VERSION.to_string(),
        });
    }

    // Node ids first: every later check resolves references against them
    let mut kinds: HashMap<String, NodeKind> = HashMap::new();
    for (position, def) in scenario.nodes.iter().enumerate() {
        match def.node_id() {
            Some(id) if !id.is_empty() => {
                if kinds.insert(id.to_string(), def.kind()).is_some() {
                    errors.push(ValidationError::DuplicateNodeId(id.to_string()));
                }
            }
            _ => errors.push(ValidationError::MissingNodeId(position)),
        }
    }

    let mut nodes = Vec::with_capacity(scenario.nodes.len());
    let mut seen = HashSet::new();
    for def in &scenario.nodes {
        let node_id = match def.node_id() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => continue,
        };
        let meta = NodeMeta {
            display_name: def.display_name().unwrap_or(&node_id).to_string(),
            node_id,
        };

        let checker_id = meta.node_id.clone();
        let mut checker = NodeChecker {
            node_id: &checker_id,
            kinds: &kinds,
            errors: &mut errors,
        };

        let node = match def {
            NodeDef::DataSource(d) => checker.data_source(meta, d),
            NodeDef::Queue(d) => checker.queue(meta, d),
            NodeDef::ProcessNode(d) => checker.process(meta, d),
            NodeDef::Fsm(d) => checker.fsm(meta, d),
            NodeDef::StateMultiplexer(d) => checker.multiplexer(meta, d),
            NodeDef::Sink(_) => Some(Node::Sink(SinkNode { meta })),
        };

        // Duplicates are already reported; keep the first definition
        if let Some(node) = node {
            if seen.insert(node.node_id().to_string()) {
                nodes.push(node);
            }
        }
    }

    if errors.is_empty() {
        Ok(ValidScenario::new(scenario, nodes))
    } else {
        Err(errors)
    }
}

/// Per-node checks; each method records every problem it finds and returns
/// the typed node only when that node is complete
struct NodeChecker<'a> {
    node_id: &'a str,
    kinds: &'a HashMap<String, NodeKind>,
    errors: &'a mut Vec<ValidationError>,
}

impl<'a> NodeChecker<'a> {
    fn missing(&mut self, field: &str) {
        self.errors.push(ValidationError::MissingField {
            node_id: self.node_id.to_string(),
            field: field.to_string(),
        });
    }

    fn invalid(&mut self, field: &str, reason: impl Into<String>) {
        self.errors.push(ValidationError::InvalidRange {
            node_id: self.node_id.to_string(),
            field: field.to_string(),
            reason: reason.into(),
        });
    }

    fn require<T: Clone>(&mut self, value: &Option<T>, field: &str) -> Option<T> {
        if value.is_none() {
            self.missing(field);
        }
        value.clone()
    }

    fn positive(&mut self, value: Option<u64>, field: &str) -> Option<u64> {
        match value {
            None => {
                self.missing(field);
                None
            }
            Some(0) => {
                self.invalid(field, "must be greater than 0");
                None
            }
            Some(v) => Some(v),
        }
    }

    /// Resolve a node reference; `destination` also rejects DataSource targets
    fn reference(&mut self, target: &Option<String>, field: &str, destination: bool) -> Option<String> {
        let target = match target {
            Some(t) if !t.is_empty() => t,
            _ => {
                self.missing(field);
                return None;
            }
        };
        match self.kinds.get(target) {
            None => {
                self.errors.push(ValidationError::DanglingReference {
                    node_id: self.node_id.to_string(),
                    field: field.to_string(),
                    target: target.clone(),
                });
                None
            }
            Some(&kind) if destination && kind == NodeKind::DataSource => {
                self.errors.push(ValidationError::InvalidDestination {
                    node_id: self.node_id.to_string(),
                    field: field.to_string(),
                    target: target.clone(),
                    kind,
                });
                None
            }
            Some(_) => Some(target.clone()),
        }
    }

    fn formula(&mut self, source: &Option<String>, field: &str) -> Option<Formula> {
        let source = match source {
            Some(s) => s,
            None => {
                self.missing(field);
                return None;
            }
        };
        match parse_formula(source) {
            Ok(formula) => Some(formula),
            Err(error) => {
                self.errors.push(ValidationError::InvalidFormula {
                    node_id: self.node_id.to_string(),
                    field: field.to_string(),
                    error,
                });
                None
            }
        }
    }

    fn data_source(&mut self, meta: NodeMeta, def: &DataSourceDef) -> Option<Node> {
        let interval = self.positive(def.interval, "interval");
        let destination = self.reference(&def.destination_node_id, "destinationNodeId", true);

        // A scripted sequence replaces random sampling, so the range is optional
        let (value_min, value_max) = if def.sequence.is_some() {
            (def.value_min.unwrap_or(0.0), def.value_max.unwrap_or(0.0))
        } else {
            let min = self.require(&def.value_min, "valueMin");
            let max = self.require(&def.value_max, "valueMax");
            match (min, max) {
                (Some(min), Some(max)) => (min, max),
                _ => return None,
            }
        };

        let mut range_ok = true;
        if !value_min.is_finite() || !value_max.is_finite() {
            self.invalid("valueMin/valueMax", "bounds must be finite numbers");
            range_ok = false;
        } else if value_min > value_max {
            self.invalid(
                "valueMin/valueMax",
                format!("valueMin ({}) exceeds valueMax ({})", value_min, value_max),
            );
            range_ok = false;
        }

        Some(Node::DataSource(DataSourceNode {
            meta,
            interval: interval?,
            value_min,
            value_max,
            destination: destination?,
            sequence: def.sequence.clone(),
        }))
        .filter(|_| range_ok)
    }

    fn queue(&mut self, meta: NodeMeta, def: &QueueDef) -> Option<Node> {
        let time_window = self.positive(def.time_window, "timeWindow");
        let destination = self.reference(&def.destination_node_id, "destinationNodeId", true);

        let method = match &def.aggregation_method {
            None => {
                self.missing("aggregationMethod");
                None
            }
            Some(name) => match name.parse::<AggregationMethod>() {
                Ok(method) => Some(method),
                Err(_) => {
                    self.errors.push(ValidationError::UnknownAggregationMethod {
                        node_id: self.node_id.to_string(),
                        method: name.clone(),
                    });
                    None
                }
            },
        };

        let mut capacity_ok = true;
        if def.capacity == Some(0) {
            self.invalid("capacity", "must be greater than 0");
            capacity_ok = false;
        }

        if !capacity_ok {
            return None;
        }
        Some(Node::Queue(QueueNode {
            meta,
            time_window: time_window?,
            method: method?,
            capacity: def.capacity,
            destination: destination?,
        }))
    }

    fn process(&mut self, meta: NodeMeta, def: &ProcessNodeDef) -> Option<Node> {
        let mut complete = true;

        if def.inputs.is_empty() {
            self.missing("inputs");
            complete = false;
        }
        if def.outputs.is_empty() {
            self.missing("outputs");
            complete = false;
        }

        let mut inputs = Vec::new();
        let mut input_names = HashSet::new();
        for (i, input) in def.inputs.iter().enumerate() {
            let name = self.require(&input.name, &format!("inputs[{}].name", i));
            let source = self.reference(&input.node_id, &format!("inputs[{}].nodeId", i), false);
            if let Some(name) = &name {
                if !input_names.insert(name.clone()) {
                    self.invalid(&format!("inputs[{}].name", i), format!("duplicate input name '{}'", name));
                    complete = false;
                }
            }
            match (name, source) {
                (Some(name), Some(source)) => inputs.push(ProcessInput { name, source }),
                _ => complete = false,
            }
        }

        let mut outputs = Vec::new();
        for (i, output) in def.outputs.iter().enumerate() {
            let name = self.require(&output.name, &format!("outputs[{}].name", i));
            let formula = self.formula(&output.formula, &format!("outputs[{}].formula", i));
            let destination = self.reference(
                &output.destination_node_id,
                &format!("outputs[{}].destinationNodeId", i),
                true,
            );
            match (name, formula, destination) {
                (Some(name), Some(formula), Some(destination)) => outputs.push(ProcessOutput {
                    name,
                    formula,
                    destination,
                }),
                _ => complete = false,
            }
        }

        if !complete {
            return None;
        }
        Some(Node::Process(ProcessNodeSpec {
            meta,
            inputs,
            outputs,
        }))
    }

    fn fsm(&mut self, meta: NodeMeta, def: &FsmNodeDef) -> Option<Node> {
        let destination = match &def.destination_node_id {
            Some(_) => Some(self.reference(&def.destination_node_id, "destinationNodeId", true)),
            None => None,
        };

        let fsm = match &def.fsm {
            Some(fsm) => fsm,
            None => {
                self.missing("fsm");
                return None;
            }
        };

        let mut complete = true;
        if fsm.states.is_empty() {
            self.missing("fsm.states");
            complete = false;
        }
        let states: HashSet<&str> = fsm.states.iter().map(|s| s.as_str()).collect();

        let initial_state = self.require(&fsm.initial_state, "fsm.initialState");
        if let Some(initial) = &initial_state {
            complete &= self.known_state(&states, initial, "fsm.initialState");
        }

        let mut transitions = Vec::new();
        for (i, t) in fsm.transitions.iter().enumerate() {
            let from = self.require(&t.from, &format!("fsm.transitions[{}].from", i));
            let to = self.require(&t.to, &format!("fsm.transitions[{}].to", i));
            if let Some(from) = &from {
                complete &= self.known_state(&states, from, &format!("fsm.transitions[{}].from", i));
            }
            if let Some(to) = &to {
                complete &= self.known_state(&states, to, &format!("fsm.transitions[{}].to", i));
            }
            if t.trigger.is_none() && t.condition.is_none() {
                self.missing(&format!("fsm.transitions[{}].trigger", i));
                complete = false;
            }
            let condition = match &t.condition {
                Some(_) => match self.formula(&t.condition, &format!("fsm.transitions[{}].condition", i)) {
                    Some(formula) => Some(formula),
                    None => {
                        complete = false;
                        None
                    }
                },
                None => None,
            };
            if let (Some(from), Some(to)) = (from, to) {
                transitions.push(Transition {
                    from,
                    to,
                    trigger: t.trigger.clone(),
                    condition,
                });
            } else {
                complete = false;
            }
        }

        let mut on_entry = BTreeMap::new();
        for (state, actions) in &fsm.on_entry {
            complete &= self.known_state(&states, state, "fsm.onEntry");
            let mut parsed = Vec::new();
            for (i, action) in actions.iter().enumerate() {
                match action {
                    FsmActionDef::Log { message } => parsed.push(FsmAction::Log {
                        message: message.clone(),
                    }),
                    FsmActionDef::Emit { formula } => {
                        let field = format!("fsm.onEntry.{}[{}].formula", state, i);
                        match self.formula(&Some(formula.clone()), &field) {
                            Some(formula) => parsed.push(FsmAction::Emit { formula }),
                            None => complete = false,
                        }
                    }
                }
            }
            on_entry.insert(state.clone(), parsed);
        }

        let destination = match destination {
            Some(Some(dest)) => Some(dest),
            Some(None) => return None,
            None => None,
        };

        if !complete {
            return None;
        }
        Some(Node::Fsm(FsmNode {
            meta,
            definition: FsmDefinition {
                states: fsm.states.clone(),
                transitions,
                initial_state: initial_state?,
                on_entry,
            },
            destination,
        }))
    }

    fn known_state(&mut self, states: &HashSet<&str>, state: &str, field: &str) -> bool {
        if states.contains(state) {
            return true;
        }
        self.errors.push(ValidationError::UnknownState {
            node_id: self.node_id.to_string(),
            field: field.to_string(),
            state: state.to_string(),
        });
        false
    }

    fn multiplexer(&mut self, meta: NodeMeta, def: &MultiplexerDef) -> Option<Node> {
        let mut complete = true;
        let mut routes = Vec::new();
        for (i, route) in def.routes.iter().enumerate() {
            let condition = self.formula(&route.condition, &format!("routes[{}].condition", i));
            let destination = self.reference(
                &route.destination_node_id,
                &format!("routes[{}].destinationNodeId", i),
                true,
            );
            match (condition, destination) {
                (Some(condition), Some(destination)) => routes.push(Route {
                    condition,
                    destination,
                }),
                _ => complete = false,
            }
        }

        let default_destination = match &def.default_route {
            Some(route) => self.reference(
                &route.destination_node_id,
                "defaultRoute.destinationNodeId",
                true,
            ),
            None => {
                self.missing("defaultRoute");
                None
            }
        };

        if !complete {
            return None;
        }
        Some(Node::Multiplexer(MultiplexerNode {
            meta,
            routes,
            default_destination: default_destination?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario(nodes: serde_json::Value) -> ScenarioDef {
        serde_json::from_value(serde_json::json!({"version": "1.0", "nodes": nodes})).unwrap()
    }

    #[test]
    fn test_minimal_valid_scenario() {
        let s = scenario(serde_json::json!([
            {"type": "DataSource", "nodeId": "src", "interval": 1, "valueMin": 0, "valueMax": 1, "destinationNodeId": "sink"},
            {"type": "Sink", "nodeId": "sink", "displayName": "Bin"}
        ]));
        let valid = validate(s).unwrap();
        assert_eq!(valid.nodes().len(), 2);
        assert_eq!(valid.node("sink").unwrap().meta().display_name, "Bin");
        // displayName falls back to nodeId
        assert_eq!(valid.node("src").unwrap().meta().display_name, "src");
    }

    #[test]
    fn test_version_mismatch() {
        let mut s = scenario(serde_json::json!([]));
        s.version = "2.0".into();
        let errors = validate(s).unwrap_err();
        assert!(matches!(errors[0], ValidationError::UnsupportedVersion { .. }));
    }

    #[test]
    fn test_duplicate_node_id() {
        let s = scenario(serde_json::json!([
            {"type": "Sink", "nodeId": "a"},
            {"type": "Sink", "nodeId": "a"}
        ]));
        assert_eq!(
            validate(s).unwrap_err(),
            vec![ValidationError::DuplicateNodeId("a".into())]
        );
    }

    #[test]
    fn test_inverted_range() {
        let s = scenario(serde_json::json!([
            {"type": "DataSource", "nodeId": "src", "interval": 1, "valueMin": 10, "valueMax": 1, "destinationNodeId": "sink"},
            {"type": "Sink", "nodeId": "sink"}
        ]));
        let errors = validate(s).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ValidationError::InvalidRange { .. }));
    }

    #[test]
    fn test_sequence_makes_range_optional() {
        let s = scenario(serde_json::json!([
            {"type": "DataSource", "nodeId": "src", "interval": 2, "sequence": [2, 5, 9], "destinationNodeId": "sink"},
            {"type": "Sink", "nodeId": "sink"}
        ]));
        assert!(validate(s).is_ok());
    }

    #[test]
    fn test_data_source_cannot_be_destination() {
        let s = scenario(serde_json::json!([
            {"type": "DataSource", "nodeId": "a", "interval": 1, "valueMin": 0, "valueMax": 1, "destinationNodeId": "b"},
            {"type": "DataSource", "nodeId": "b", "interval": 1, "valueMin": 0, "valueMax": 1, "destinationNodeId": "sink"},
            {"type": "Sink", "nodeId": "sink"}
        ]));
        let errors = validate(s).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ValidationError::InvalidDestination { .. }));
    }

    #[test]
    fn test_missing_fields_all_reported() {
        let s = scenario(serde_json::json!([
            {"type": "Queue", "nodeId": "q"}
        ]));
        let errors = validate(s).unwrap_err();
        // timeWindow, destinationNodeId, aggregationMethod
        assert_eq!(errors.len(), 3);
        assert!(errors
            .iter()
            .all(|e| matches!(e, ValidationError::MissingField { .. })));
    }

    #[test]
    fn test_unknown_aggregation_method() {
        let s = scenario(serde_json::json!([
            {"type": "Queue", "nodeId": "q", "timeWindow": 3, "aggregationMethod": "median", "destinationNodeId": "sink"},
            {"type": "Sink", "nodeId": "sink"}
        ]));
        assert_eq!(
            validate(s).unwrap_err(),
            vec![ValidationError::UnknownAggregationMethod {
                node_id: "q".into(),
                method: "median".into()
            }]
        );
    }

    #[test]
    fn test_bad_formula_reported() {
        let s = scenario(serde_json::json!([
            {"type": "ProcessNode", "nodeId": "p",
             "inputs": [{"name": "x", "nodeId": "p"}],
             "outputs": [{"name": "out", "formula": "x +", "destinationNodeId": "sink"}]},
            {"type": "Sink", "nodeId": "sink"}
        ]));
        let errors = validate(s).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ValidationError::InvalidFormula { .. }));
    }

    #[test]
    fn test_fsm_unknown_states() {
        let s = scenario(serde_json::json!([
            {"type": "FSM", "nodeId": "m", "fsm": {
                "states": ["idle"],
                "initialState": "busy",
                "transitions": [{"from": "idle", "to": "gone", "trigger": "go"}]
            }}
        ]));
        let errors = validate(s).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors
            .iter()
            .all(|e| matches!(e, ValidationError::UnknownState { .. })));
    }

    #[test]
    fn test_multiplexer_requires_default_route() {
        let s = scenario(serde_json::json!([
            {"type": "StateMultiplexer", "nodeId": "mux", "routes": [{"condition": "value > 1", "destinationNodeId": "sink"}]},
            {"type": "Sink", "nodeId": "sink"}
        ]));
        assert_eq!(
            validate(s).unwrap_err(),
            vec![ValidationError::MissingField {
                node_id: "mux".into(),
                field: "defaultRoute".into()
            }]
        );
    }

    #[test]
    fn test_schedule_puts_producers_first() {
        let s = scenario(serde_json::json!([
            {"type": "Sink", "nodeId": "sink"},
            {"type": "Queue", "nodeId": "q", "timeWindow": 2, "aggregationMethod": "sum", "destinationNodeId": "sink"},
            {"type": "DataSource", "nodeId": "src", "interval": 1, "valueMin": 0, "valueMax": 1, "destinationNodeId": "q"}
        ]));
        let valid = validate(s).unwrap();
        assert_eq!(valid.schedule_ids(), vec!["src", "q", "sink"]);
    }
}
