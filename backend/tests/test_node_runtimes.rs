//! Node Runtime Tests
//!
//! Each node kind driven through the engine, checking what it writes to the
//! activity log and which tokens it hands downstream.

use serde_json::json;
use workflow_simulator_core_rs::{
    Engine, EngineConfig, HistoryAction, HistoryFilter, LineageType,
};

// ============================================================================
// Test Helpers
// ============================================================================

fn engine(json: &str) -> Engine {
    Engine::from_json(json, EngineConfig::default()).unwrap()
}

fn actions_of(engine: &Engine, node_id: &str) -> Vec<HistoryAction> {
    engine
        .activity_log()
        .for_node(node_id)
        .into_iter()
        .map(|e| e.action)
        .collect()
}

fn queue_scenario(sequence: &str, window: u64, capacity: Option<u64>) -> String {
    let capacity = capacity.map_or(String::new(), |c| format!(r#", "capacity": {}"#, c));
    format!(
        r#"{{
        "version": "1.0",
        "nodes": [
            {{"type": "DataSource", "nodeId": "src", "interval": 1, "sequence": {}, "destinationNodeId": "window"}},
            {{"type": "Queue", "nodeId": "window", "timeWindow": {}, "aggregationMethod": "sum"{}, "destinationNodeId": "bin"}},
            {{"type": "Sink", "nodeId": "bin"}}
        ]
    }}"#,
        sequence, window, capacity
    )
}

// ============================================================================
// Queue
// ============================================================================

#[test]
fn test_queue_flushes_window_on_boundary_tick() {
    let mut engine = engine(&queue_scenario("[4, 160, 10]", 3, None));
    engine.run_ticks(3).unwrap();
    assert_eq!(engine.tokens_created(), 3);
    assert_eq!(
        actions_of(&engine, "window"),
        vec![HistoryAction::Enqueued; 3]
    );

    engine.tick().unwrap();
    let aggregated: Vec<_> = engine
        .activity_log()
        .entries()
        .iter()
        .filter(|e| matches!(e.action, HistoryAction::Aggregated(_)))
        .cloned()
        .collect();
    assert_eq!(aggregated.len(), 1);
    let entry = &aggregated[0];
    assert_eq!(entry.action.to_string(), "AGGREGATED_SUM");
    assert_eq!(entry.timestamp, 4);
    assert_eq!(entry.value, Some(json!(174)));
    assert_eq!(
        entry.source_token_ids,
        vec!["tok_00000001", "tok_00000002", "tok_00000003"]
    );

    // Same tick: the sink downstream consumes the aggregate
    let consumed = engine.history(&HistoryFilter::node("bin"));
    assert_eq!(consumed.len(), 1);
    assert_eq!(consumed[0].token_id, entry.token_id);

    let aggregate_id = entry.token_id.clone().unwrap();
    let lineage = engine.lineage().get_lineage(&aggregate_id).unwrap();
    assert_eq!(lineage.depth, 1);
    assert_eq!(lineage.lineage_type, LineageType::Consumed);
    assert_eq!(engine.lineage().get_descendants("tok_00000002").len(), 1);
}

#[test]
fn test_queue_capacity_flushes_immediately() {
    let mut engine = engine(&queue_scenario("[1, 2, 3]", 10, Some(2)));
    engine.run_ticks(2).unwrap();

    let window = engine.history(&HistoryFilter::node("window"));
    let last = window.last().unwrap();
    assert!(matches!(last.action, HistoryAction::Aggregated(_)));
    assert_eq!(last.timestamp, 2);
    assert_eq!(last.value, Some(json!(3)));

    // The third value opens a fresh window that stays open
    engine.run_ticks(5).unwrap();
    let aggregates = engine
        .activity_log()
        .entries()
        .iter()
        .filter(|e| e.node_id == "window" && e.action.is_token_creation())
        .count();
    assert_eq!(aggregates, 1);
}

#[test]
fn test_queue_non_numeric_window_discarded() {
    let mut engine = engine(&queue_scenario(r#"["abc", 1]"#, 2, None));
    let results = engine.run_ticks(3).unwrap();

    assert_eq!(results[2].errors, 1);
    assert_eq!(engine.tokens_created(), 2);
    let errors = engine.history(&HistoryFilter::action(HistoryAction::Error));
    assert_eq!(errors[0].node_id, "window");
    assert_eq!(
        errors[0].details.as_ref().unwrap()["discarded"],
        json!(["tok_00000001", "tok_00000002"])
    );
    assert!(engine.history(&HistoryFilter::node("bin")).is_empty());
}

// ============================================================================
// ProcessNode
// ============================================================================

const TWO_INPUTS: &str = r#"{
    "version": "1.0",
    "nodes": [
        {"type": "DataSource", "nodeId": "left", "interval": 1, "sequence": [3, 4], "destinationNodeId": "calc"},
        {"type": "DataSource", "nodeId": "right", "interval": 1, "sequence": [5, 6], "destinationNodeId": "calc"},
        {"type": "ProcessNode", "nodeId": "calc",
         "inputs": [{"name": "a", "nodeId": "left"}, {"name": "b", "nodeId": "right"}],
         "outputs": [{"name": "product", "formula": "a * b + 1", "destinationNodeId": "bin"}]},
        {"type": "Sink", "nodeId": "bin"}
    ]
}"#;

#[test]
fn test_process_node_waits_for_all_referenced_inputs() {
    let mut engine = engine(TWO_INPUTS);
    engine.tick().unwrap();

    assert_eq!(
        actions_of(&engine, "calc"),
        vec![
            HistoryAction::InputBuffered,
            HistoryAction::InputBuffered,
            HistoryAction::Created
        ]
    );
    let created = engine.history(&HistoryFilter {
        node_id: Some("calc".into()),
        action: Some(HistoryAction::Created),
        ..HistoryFilter::default()
    });
    assert_eq!(created[0].value, Some(json!(16)));
    assert_eq!(created[0].source_token_ids.len(), 2);
    assert_eq!(created[0].details.as_ref().unwrap()["formula"], "a * b + 1");
}

#[test]
fn test_process_node_is_deterministic() {
    let outputs = |engine: &Engine| -> Vec<serde_json::Value> {
        engine
            .history(&HistoryFilter::node("bin"))
            .into_iter()
            .filter_map(|e| e.value)
            .collect()
    };

    let mut first = engine(TWO_INPUTS);
    first.run_ticks(4).unwrap();
    let mut second = engine(TWO_INPUTS);
    second.run_ticks(4).unwrap();

    assert_eq!(outputs(&first), vec![json!(16), json!(25)]);
    assert_eq!(outputs(&first), outputs(&second));
}

#[test]
fn test_process_node_unbound_name_logs_error() {
    let json = r#"{
        "version": "1.0",
        "nodes": [
            {"type": "DataSource", "nodeId": "src", "interval": 1, "sequence": [7], "destinationNodeId": "calc"},
            {"type": "ProcessNode", "nodeId": "calc",
             "inputs": [{"name": "x", "nodeId": "src"}],
             "outputs": [{"name": "y", "formula": "x + missing", "destinationNodeId": "bin"}]},
            {"type": "Sink", "nodeId": "bin"}
        ]
    }"#;
    let mut engine = engine(json);
    let result = engine.tick().unwrap();

    assert_eq!(result.errors, 1);
    assert_eq!(result.tokens_created, 1);
    let error = &engine.history(&HistoryFilter::action(HistoryAction::Error))[0];
    assert_eq!(error.node_id, "calc");
    assert_eq!(error.source_token_ids, vec!["tok_00000001"]);
    assert!(error.details.as_ref().unwrap()["error"].is_string());

    // Inputs were consumed by the failed round
    engine.tick().unwrap();
    assert_eq!(engine.tokens_created(), 1);
    assert!(engine.history(&HistoryFilter::node("bin")).is_empty());
}

#[test]
fn test_process_node_multiple_outputs_split() {
    let json = r#"{
        "version": "1.0",
        "nodes": [
            {"type": "DataSource", "nodeId": "src", "interval": 1, "sequence": [4], "destinationNodeId": "calc"},
            {"type": "ProcessNode", "nodeId": "calc",
             "inputs": [{"name": "x", "nodeId": "src"}],
             "outputs": [
                {"name": "inc", "formula": "x + 1", "destinationNodeId": "bin"},
                {"name": "double", "formula": "x * 2", "destinationNodeId": "bin"}
             ]},
            {"type": "Sink", "nodeId": "bin"}
        ]
    }"#;
    let mut engine = engine(json);
    engine.tick().unwrap();

    let splits = engine.history(&HistoryFilter::action(HistoryAction::Split));
    let values: Vec<_> = splits.iter().map(|e| e.value.clone().unwrap()).collect();
    assert_eq!(values, vec![json!(5), json!(8)]);

    let first = splits[0].token_id.clone().unwrap();
    let second = splits[1].token_id.clone().unwrap();
    let lineage = engine.lineage().get_lineage(&second).unwrap();
    assert_eq!(lineage.action, HistoryAction::Split);
    let siblings = engine.lineage().get_siblings(&first);
    assert_eq!(siblings.len(), 1);
    assert_eq!(siblings[0].token_id, second);
}

// ============================================================================
// StateMultiplexer & Sink
// ============================================================================

#[test]
fn test_multiplexer_forwards_same_token() {
    let json = r#"{
        "version": "1.0",
        "nodes": [
            {"type": "DataSource", "nodeId": "src", "interval": 1, "sequence": [150, 20], "destinationNodeId": "mux"},
            {"type": "StateMultiplexer", "nodeId": "mux",
             "routes": [{"condition": "value > 100", "destinationNodeId": "large"}],
             "defaultRoute": {"destinationNodeId": "small"}},
            {"type": "Sink", "nodeId": "large"},
            {"type": "Sink", "nodeId": "small"}
        ]
    }"#;
    let mut engine = engine(json);
    engine.run_ticks(2).unwrap();

    // Routing mints nothing
    assert_eq!(engine.tokens_created(), 2);

    let routed = engine.history(&HistoryFilter::action(HistoryAction::Routed));
    assert_eq!(routed.len(), 2);
    assert_eq!(routed[0].token_id.as_deref(), Some("tok_00000001"));
    assert_eq!(routed[0].details.as_ref().unwrap()["destination"], "large");
    assert_eq!(routed[1].details.as_ref().unwrap()["route"], "default");

    let large = engine.history(&HistoryFilter::node("large"));
    let small = engine.history(&HistoryFilter::node("small"));
    assert_eq!(large[0].token_id.as_deref(), Some("tok_00000001"));
    assert_eq!(small[0].token_id.as_deref(), Some("tok_00000002"));
}

#[test]
fn test_sink_marks_tokens_consumed() {
    let mut engine = engine(&queue_scenario("[1]", 1, None));
    engine.run_ticks(2).unwrap();

    let source = engine.lineage().get_lineage("tok_00000001").unwrap();
    assert_eq!(source.lineage_type, LineageType::Source);

    let aggregate = engine.lineage().get_lineage("tok_00000002").unwrap();
    assert_eq!(aggregate.lineage_type, LineageType::Consumed);
    assert_eq!(actions_of(&engine, "bin"), vec![HistoryAction::Consumed]);
}

// ============================================================================
// Scheduling
// ============================================================================

/// mux → proc → mux loop: values below 3 go round again
const FEEDBACK: &str = r#"{
    "version": "1.0",
    "nodes": [
        {"type": "DataSource", "nodeId": "src", "interval": 1, "sequence": [1], "destinationNodeId": "mux"},
        {"type": "StateMultiplexer", "nodeId": "mux",
         "routes": [{"condition": "value < 3", "destinationNodeId": "proc"}],
         "defaultRoute": {"destinationNodeId": "sink"}},
        {"type": "ProcessNode", "nodeId": "proc",
         "inputs": [{"name": "x", "nodeId": "mux"}],
         "outputs": [{"name": "next", "formula": "x + 1", "destinationNodeId": "mux"}]},
        {"type": "Sink", "nodeId": "sink"}
    ]
}"#;

#[test]
fn test_forward_edges_deliver_same_tick() {
    let mut engine = engine(TWO_INPUTS);
    let result = engine.tick().unwrap();
    // both sources, the product, and the sink all in tick 1
    assert_eq!(result.tokens_created, 3);
    assert_eq!(result.tokens_consumed, 1);
}

#[test]
fn test_back_edge_delivers_next_tick() {
    let mut engine = engine(FEEDBACK);
    assert_eq!(engine.scenario().schedule_ids(), vec!["src", "mux", "proc", "sink"]);

    let results = engine.run_ticks(3).unwrap();
    let created: Vec<u64> = results.iter().map(|r| r.tokens_created).collect();
    assert_eq!(created, vec![2, 1, 0]);
    let consumed: Vec<usize> = results.iter().map(|r| r.tokens_consumed).collect();
    assert_eq!(consumed, vec![0, 0, 1]);

    let sink = engine.history(&HistoryFilter::node("sink"));
    assert_eq!(sink[0].timestamp, 3);
    assert_eq!(sink[0].value, Some(json!(3)));

    let token_id = sink[0].token_id.clone().unwrap();
    assert_eq!(engine.lineage().get_lineage(&token_id).unwrap().depth, 2);
    assert!(engine.validate_integrity().is_valid());
}
