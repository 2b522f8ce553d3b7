//! FSM runtime
//!
//! Each incoming token becomes a [`Message`]. Transitions leaving the current
//! state are tried in declared order; the first whose trigger equals the
//! message type, or whose condition holds, is taken. A message matching no
//! transition leaves the state unchanged and is logged as `TRIGGER_IGNORED`.

use crate::core::time::SimTime;
use crate::formula::{evaluate, evaluate_condition, Bindings};
use crate::models::history::{EntryDraft, HistoryAction};
use crate::models::token::{Token, TokenId};
use crate::runtime::context::{Delivery, Emission, RunContext};
use crate::scenario::model::{FsmAction, FsmNode, Transition};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

/// Unit consumed by a transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub timestamp: SimTime,
    pub data: Value,
    /// Token the message was built from
    pub from_event: TokenId,
}

impl Message {
    pub fn from_token(id: String, token: &Token, now: SimTime) -> Self {
        Self {
            id,
            message_type: message_type(token.value()),
            timestamp: now,
            data: token.value().clone(),
            from_event: token.id().to_string(),
        }
    }
}

/// String value, else an object's `type` field, else the JSON text
pub fn message_type(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("type") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => value.to_string(),
        },
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsmState {
    pub current_state: String,
    pub transitions_taken: u64,
}

impl FsmState {
    pub fn new(spec: &FsmNode) -> Self {
        Self {
            current_state: spec.definition.initial_state.clone(),
            transitions_taken: 0,
        }
    }

    pub fn on_tick(
        &mut self,
        spec: &FsmNode,
        now: SimTime,
        inbox: Vec<Delivery>,
        ctx: &mut RunContext,
    ) -> Vec<Emission> {
        let mut out = Vec::new();
        for delivery in inbox {
            out.extend(self.handle(spec, now, &delivery.token, ctx));
        }
        out
    }

    fn handle(&mut self, spec: &FsmNode, now: SimTime, token: &Token, ctx: &mut RunContext) -> Vec<Emission> {
        let node_id = &spec.meta.node_id;
        let message = Message::from_token(ctx.mint_message_id(), token, now);
        let bindings = Bindings::new()
            .with("value", message.data.clone())
            .with("type", Value::String(message.message_type.clone()))
            .with("state", Value::String(self.current_state.clone()));

        let matched = spec
            .definition
            .transitions_from(&self.current_state)
            .find(|t| self.matches(t, &message, &bindings, spec, now, ctx))
            .cloned();

        let transition = match matched {
            Some(t) => t,
            None => {
                ctx.record(
                    now,
                    EntryDraft::new(node_id.clone(), HistoryAction::TriggerIgnored)
                        .token(token.id())
                        .value(token.value().clone())
                        .details(json!({
                            "state": self.current_state,
                            "messageId": message.id,
                            "messageType": message.message_type,
                        })),
                );
                return Vec::new();
            }
        };

        let from = std::mem::replace(&mut self.current_state, transition.to.clone());
        self.transitions_taken += 1;
        debug!(node_id = %node_id, from = %from, to = %transition.to, "fsm transition");
        ctx.record(
            now,
            EntryDraft::new(node_id.clone(), HistoryAction::Transition)
                .token(token.id())
                .value(token.value().clone())
                .details(json!({
                    "from": from,
                    "to": transition.to,
                    "trigger": transition.trigger,
                    "condition": transition.condition.as_ref().map(|c| c.source()),
                    "messageId": message.id,
                    "messageType": message.message_type,
                })),
        );

        self.enter_state(spec, now, token, &message, ctx)
    }

    /// Trigger match first; conditions that fail to evaluate count as false
    fn matches(
        &self,
        transition: &Transition,
        message: &Message,
        bindings: &Bindings,
        spec: &FsmNode,
        now: SimTime,
        ctx: &mut RunContext,
    ) -> bool {
        if transition.trigger.as_deref() == Some(message.message_type.as_str()) {
            return true;
        }
        let condition = match &transition.condition {
            Some(c) => c,
            None => return false,
        };
        match evaluate_condition(condition, bindings) {
            Ok(holds) => holds,
            Err(error) => {
                warn!(node_id = %spec.meta.node_id, %error, "transition condition failed");
                ctx.record(
                    now,
                    EntryDraft::new(spec.meta.node_id.clone(), HistoryAction::Error)
                        .token(message.from_event.clone())
                        .details(json!({
                            "condition": condition.source(),
                            "from": transition.from,
                            "to": transition.to,
                            "error": error.to_string(),
                        })),
                );
                false
            }
        }
    }

    /// Run onEntry actions for the state just entered
    fn enter_state(
        &self,
        spec: &FsmNode,
        now: SimTime,
        trigger: &Token,
        message: &Message,
        ctx: &mut RunContext,
    ) -> Vec<Emission> {
        let node_id = &spec.meta.node_id;
        let state = self.current_state.as_str();
        let actions = spec
            .definition
            .on_entry
            .get(state)
            .map(|a| a.as_slice())
            .unwrap_or(&[]);
        let bindings = Bindings::new()
            .with("value", message.data.clone())
            .with("type", Value::String(message.message_type.clone()))
            .with("state", Value::String(state.to_string()));

        let mut derived = Vec::new();
        let mut emitted = false;
        for action in actions {
            match action {
                FsmAction::Log { message: text } => {
                    ctx.record(
                        now,
                        EntryDraft::new(node_id.clone(), HistoryAction::FsmLog)
                            .token(trigger.id())
                            .details(json!({"state": state, "message": text})),
                    );
                }
                FsmAction::Emit { formula } => {
                    emitted = true;
                    match evaluate(formula, &bindings) {
                        Ok(value) => derived.push((value, Some(formula.source()))),
                        Err(error) => {
                            warn!(node_id = %node_id, %error, "onEntry emit failed");
                            ctx.record(
                                now,
                                EntryDraft::new(node_id.clone(), HistoryAction::Error)
                                    .token(trigger.id())
                                    .details(json!({
                                        "state": state,
                                        "formula": formula.source(),
                                        "error": error.to_string(),
                                    })),
                            );
                        }
                    }
                }
            }
        }

        // Without an explicit emit the new state itself flows downstream
        if !emitted && spec.destination.is_some() {
            derived.push((Value::String(state.to_string()), None));
        }

        let mut out = Vec::new();
        for (value, formula) in derived {
            let details = json!({"state": state, "formula": formula, "messageId": message.id});
            let token = ctx.create_token(
                now,
                &spec.meta,
                value,
                vec![trigger.id().to_string()],
                HistoryAction::Created,
                Some(details),
            );
            if let Some(destination) = &spec.destination {
                out.push(Emission::new(destination.clone(), token));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::WallClock;
    use crate::formula::parse_formula;
    use crate::scenario::model::{FsmDefinition, NodeMeta};
    use std::collections::BTreeMap;

    fn transition(from: &str, to: &str, trigger: Option<&str>, condition: Option<&str>) -> Transition {
        Transition {
            from: from.into(),
            to: to.into(),
            trigger: trigger.map(String::from),
            condition: condition.map(|c| parse_formula(c).unwrap()),
        }
    }

    fn machine(transitions: Vec<Transition>, on_entry: BTreeMap<String, Vec<FsmAction>>, destination: Option<&str>) -> FsmNode {
        FsmNode {
            meta: NodeMeta {
                node_id: "m".into(),
                display_name: "Machine".into(),
            },
            definition: FsmDefinition {
                states: vec!["idle".into(), "busy".into(), "done".into()],
                transitions,
                initial_state: "idle".into(),
                on_entry,
            },
            destination: destination.map(String::from),
        }
    }

    fn deliver(id: &str, value: Value) -> Vec<Delivery> {
        vec![Delivery {
            from: "up".into(),
            token: Token::new(id.into(), value, 0, "up".into(), vec![]),
        }]
    }

    #[test]
    fn test_message_type_extraction() {
        assert_eq!(message_type(&json!("go")), "go");
        assert_eq!(message_type(&json!({"type": "start", "n": 1})), "start");
        assert_eq!(message_type(&json!(5)), "5");
    }

    #[test]
    fn test_trigger_transition_emits_state_name() {
        let spec = machine(vec![transition("idle", "busy", Some("go"), None)], BTreeMap::new(), Some("out"));
        let mut state = FsmState::new(&spec);
        let mut ctx = RunContext::new(0, WallClock::System);

        let out = state.on_tick(&spec, 1, deliver("t1", json!("go")), &mut ctx);
        assert_eq!(state.current_state, "busy");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].token.value(), &json!("busy"));
        assert_eq!(out[0].token.parent_token_ids(), &["t1"]);

        let actions: Vec<_> = ctx.log().entries().iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![HistoryAction::Transition, HistoryAction::Created]);
    }

    #[test]
    fn test_unmatched_trigger_is_noop() {
        let spec = machine(vec![transition("idle", "busy", Some("go"), None)], BTreeMap::new(), Some("out"));
        let mut state = FsmState::new(&spec);
        let mut ctx = RunContext::new(0, WallClock::System);

        let out = state.on_tick(&spec, 1, deliver("t1", json!("stop")), &mut ctx);
        assert!(out.is_empty());
        assert_eq!(state.current_state, "idle");
        assert_eq!(ctx.log().len(), 1);
        assert_eq!(ctx.log().entries()[0].action, HistoryAction::TriggerIgnored);
        assert_eq!(ctx.tokens_created(), 0);
    }

    #[test]
    fn test_condition_transition_and_on_entry_actions() {
        let mut on_entry = BTreeMap::new();
        on_entry.insert(
            "busy".to_string(),
            vec![
                FsmAction::Log {
                    message: "started".into(),
                },
                FsmAction::Emit {
                    formula: parse_formula("value * 10").unwrap(),
                },
            ],
        );
        let spec = machine(
            vec![transition("idle", "busy", None, Some("value > 3 && state == \"idle\""))],
            on_entry,
            Some("out"),
        );
        let mut state = FsmState::new(&spec);
        let mut ctx = RunContext::new(0, WallClock::System);

        assert!(state.on_tick(&spec, 1, deliver("t1", json!(2)), &mut ctx).is_empty());
        assert_eq!(state.current_state, "idle");

        let out = state.on_tick(&spec, 2, deliver("t2", json!(7)), &mut ctx);
        assert_eq!(state.current_state, "busy");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].token.value(), &json!(70));
        assert!(ctx
            .log()
            .entries()
            .iter()
            .any(|e| e.action == HistoryAction::FsmLog));
    }

    #[test]
    fn test_condition_error_counts_as_false() {
        let spec = machine(
            vec![transition("idle", "busy", None, Some("value.missing > 1"))],
            BTreeMap::new(),
            None,
        );
        let mut state = FsmState::new(&spec);
        let mut ctx = RunContext::new(0, WallClock::System);

        state.on_tick(&spec, 1, deliver("t1", json!({"type": "x"})), &mut ctx);
        assert_eq!(state.current_state, "idle");
        let actions: Vec<_> = ctx.log().entries().iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![HistoryAction::Error, HistoryAction::TriggerIgnored]);
    }
}
