//! StateMultiplexer runtime
//!
//! Forwards each incoming token unchanged along the first route whose
//! condition holds for `value`, or along the default route. Exactly one
//! outgoing delivery per incoming token.

use crate::core::time::SimTime;
use crate::formula::{evaluate_condition, Bindings};
use crate::models::history::{EntryDraft, HistoryAction};
use crate::runtime::context::{Delivery, Emission, RunContext};
use crate::scenario::model::MultiplexerNode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiplexerState {
    /// Tokens forwarded per destination
    pub routed: BTreeMap<String, u64>,
}

impl MultiplexerState {
    pub fn on_tick(
        &mut self,
        spec: &MultiplexerNode,
        now: SimTime,
        inbox: Vec<Delivery>,
        ctx: &mut RunContext,
    ) -> Vec<Emission> {
        let node_id = &spec.meta.node_id;
        let mut out = Vec::with_capacity(inbox.len());

        for delivery in inbox {
            let token = delivery.token;
            let bindings = Bindings::new().with("value", token.value().clone());

            let mut chosen = None;
            for (index, route) in spec.routes.iter().enumerate() {
                match evaluate_condition(&route.condition, &bindings) {
                    Ok(true) => {
                        chosen = Some((index, route));
                        break;
                    }
                    Ok(false) => {}
                    Err(error) => {
                        warn!(node_id = %node_id, route = index, %error, "route condition failed");
                        ctx.record(
                            now,
                            EntryDraft::new(node_id.clone(), HistoryAction::Error)
                                .token(token.id())
                                .details(json!({
                                    "route": index,
                                    "condition": route.condition.source(),
                                    "error": error.to_string(),
                                })),
                        );
                    }
                }
            }

            let (destination, details) = match chosen {
                Some((index, route)) => (
                    route.destination.clone(),
                    json!({
                        "route": index,
                        "condition": route.condition.source(),
                        "destination": route.destination,
                    }),
                ),
                None => (
                    spec.default_destination.clone(),
                    json!({"route": "default", "destination": spec.default_destination}),
                ),
            };

            ctx.record(
                now,
                EntryDraft::new(node_id.clone(), HistoryAction::Routed)
                    .token(token.id())
                    .value(token.value().clone())
                    .details(details),
            );
            *self.routed.entry(destination.clone()).or_insert(0) += 1;
            out.push(Emission::new(destination, token));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::WallClock;
    use crate::formula::parse_formula;
    use crate::models::token::Token;
    use crate::scenario::model::{NodeMeta, Route};
    use serde_json::Value;

    fn mux() -> MultiplexerNode {
        MultiplexerNode {
            meta: NodeMeta {
                node_id: "mux".into(),
                display_name: "Mux".into(),
            },
            routes: vec![
                Route {
                    condition: parse_formula("value > 100").unwrap(),
                    destination: "big".into(),
                },
                Route {
                    condition: parse_formula("value > 10").unwrap(),
                    destination: "medium".into(),
                },
            ],
            default_destination: "small".into(),
        }
    }

    fn route(value: Value) -> Vec<Emission> {
        let mut state = MultiplexerState::default();
        let mut ctx = RunContext::new(0, WallClock::System);
        let inbox = vec![Delivery {
            from: "up".into(),
            token: Token::new("t1".into(), value, 0, "up".into(), vec![]),
        }];
        state.on_tick(&mux(), 1, inbox, &mut ctx)
    }

    #[test]
    fn test_first_true_route_wins() {
        let out = route(json!(500));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].destination, "big");
        // Same token forwarded, not a copy
        assert_eq!(out[0].token.id(), "t1");
        assert_eq!(route(json!(50))[0].destination, "medium");
    }

    #[test]
    fn test_default_route() {
        assert_eq!(route(json!(1))[0].destination, "small");
    }

    #[test]
    fn test_condition_error_falls_through_to_default() {
        let out = route(json!("text"));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].destination, "small");
    }
}
