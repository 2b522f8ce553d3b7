//! ProcessNode runtime - multi-input formula evaluation
//!
//! Arriving tokens are slotted by input name. After each arrival every output
//! whose referenced inputs are all buffered is evaluated; the inputs consumed
//! by that round are cleared whether evaluation succeeded or not.

use crate::core::time::SimTime;
use crate::formula::{evaluate, Bindings, EvalError};
use crate::models::history::{EntryDraft, HistoryAction};
use crate::models::token::Token;
use crate::runtime::context::{Delivery, Emission, RunContext};
use crate::scenario::model::{ProcessNodeSpec, ProcessOutput};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessState {
    /// Input name → buffered token
    pub slots: BTreeMap<String, Token>,
}

impl ProcessState {
    pub fn on_tick(
        &mut self,
        spec: &ProcessNodeSpec,
        now: SimTime,
        inbox: Vec<Delivery>,
        ctx: &mut RunContext,
    ) -> Vec<Emission> {
        let mut out = Vec::new();
        for delivery in inbox {
            if self.accept(spec, now, delivery, ctx) {
                out.extend(self.fire(spec, now, ctx));
            }
        }
        out
    }

    /// Store an arrival in its input slot; false if no input is bound to the sender
    fn accept(&mut self, spec: &ProcessNodeSpec, now: SimTime, delivery: Delivery, ctx: &mut RunContext) -> bool {
        let node_id = &spec.meta.node_id;
        let bound: Vec<&str> = spec
            .inputs
            .iter()
            .filter(|i| i.source == delivery.from)
            .map(|i| i.name.as_str())
            .collect();

        let slot = match bound.iter().find(|name| !self.slots.contains_key(**name)) {
            Some(name) => *name,
            None => match bound.first() {
                Some(name) => *name,
                None => {
                    warn!(node_id = %node_id, from = %delivery.from, "token from unbound upstream dropped");
                    ctx.record(
                        now,
                        EntryDraft::new(node_id.clone(), HistoryAction::Error)
                            .token(delivery.token.id())
                            .value(delivery.token.value().clone())
                            .details(json!({
                                "error": format!("no input is bound to upstream node '{}'", delivery.from),
                            })),
                    );
                    return false;
                }
            },
        };

        let replaced = self.slots.get(slot).map(|t| t.id().to_string());
        ctx.record(
            now,
            EntryDraft::new(node_id.clone(), HistoryAction::InputBuffered)
                .token(delivery.token.id())
                .value(delivery.token.value().clone())
                .details(json!({"input": slot, "from": delivery.from, "replaced": replaced})),
        );
        self.slots.insert(slot.to_string(), delivery.token);
        true
    }

    /// Evaluate every ready output and clear the inputs they consumed
    fn fire(&mut self, spec: &ProcessNodeSpec, now: SimTime, ctx: &mut RunContext) -> Vec<Emission> {
        let ready: Vec<(&ProcessOutput, Vec<&str>)> = spec
            .outputs
            .iter()
            .map(|o| (o, required_inputs(spec, o)))
            .filter(|(_, required)| required.iter().all(|name| self.slots.contains_key(*name)))
            .collect();
        if ready.is_empty() {
            return Vec::new();
        }

        let bindings: Bindings = self
            .slots
            .iter()
            .map(|(name, token)| (name.clone(), token.value().clone()))
            .collect();

        let results: Vec<Result<Value, EvalError>> = ready
            .iter()
            .map(|(output, _)| evaluate(&output.formula, &bindings))
            .collect();
        let action = if results.iter().filter(|r| r.is_ok()).count() >= 2 {
            HistoryAction::Split
        } else {
            HistoryAction::Created
        };

        let mut out = Vec::new();
        let mut consumed = BTreeSet::new();
        for ((output, required), result) in ready.iter().zip(results) {
            let parents: Vec<String> = required
                .iter()
                .filter_map(|name| self.slots.get(*name))
                .map(|t| t.id().to_string())
                .collect();
            let inputs: Map<String, Value> = required
                .iter()
                .filter_map(|name| self.slots.get(*name).map(|t| (name.to_string(), t.value().clone())))
                .collect();
            consumed.extend(required.iter().map(|name| name.to_string()));

            match result {
                Ok(value) => {
                    let details = json!({
                        "output": output.name,
                        "formula": output.formula.source(),
                        "inputs": inputs,
                        "result": value,
                    });
                    let token = ctx.create_token(now, &spec.meta, value, parents, action, Some(details));
                    out.push(Emission::new(output.destination.clone(), token));
                }
                Err(error) => {
                    warn!(
                        node_id = %spec.meta.node_id,
                        output = %output.name,
                        %error,
                        "formula evaluation failed"
                    );
                    ctx.record(
                        now,
                        EntryDraft::new(spec.meta.node_id.clone(), HistoryAction::Error)
                            .sources(parents)
                            .details(json!({
                                "output": output.name,
                                "formula": output.formula.source(),
                                "inputs": inputs,
                                "error": error.to_string(),
                            })),
                    );
                }
            }
        }

        for name in consumed {
            self.slots.remove(&name);
        }
        out
    }
}

/// Inputs an output waits for: the declared inputs its formula references,
/// or every declared input when it references none of them
fn required_inputs<'a>(spec: &'a ProcessNodeSpec, output: &'a ProcessOutput) -> Vec<&'a str> {
    let referenced = output.required_inputs(&spec.inputs);
    if referenced.is_empty() {
        spec.inputs.iter().map(|i| i.name.as_str()).collect()
    } else {
        referenced
    }
}
