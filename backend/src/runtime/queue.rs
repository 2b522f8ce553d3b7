//! Queue runtime - time-windowed aggregation
//!
//! The window opens at the first buffered arrival and closes on the first tick
//! with `t >= openedAt + timeWindow`. On that boundary tick the window is
//! flushed *before* the tick's arrivals are buffered, so they start the next
//! window. Reaching `capacity` flushes immediately.

use crate::core::time::SimTime;
use crate::formula::number_value;
use crate::models::history::{EntryDraft, HistoryAction};
use crate::models::token::Token;
use crate::runtime::context::{Delivery, Emission, RunContext};
use crate::scenario::model::QueueNode;
use crate::scenario::types::AggregationMethod;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AggregationError {
    #[error("Cannot {method} non-numeric value {found} from token {token_id}")]
    NonNumeric {
        method: &'static str,
        token_id: String,
        found: String,
    },

    #[error("Aggregate is not a finite number")]
    NonFinite,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueState {
    /// Buffered tokens in arrival order
    pub buffer: Vec<Token>,
    /// Time the current window opened (None while empty)
    pub opened_at: Option<SimTime>,
}

impl QueueState {
    pub fn on_tick(
        &mut self,
        spec: &QueueNode,
        now: SimTime,
        inbox: Vec<Delivery>,
        ctx: &mut RunContext,
    ) -> Vec<Emission> {
        let mut out = Vec::new();

        if let Some(opened_at) = self.opened_at {
            if now >= opened_at.saturating_add(spec.time_window) {
                out.extend(self.flush(spec, now, ctx));
            }
        }

        for delivery in inbox {
            let token = delivery.token;
            if self.opened_at.is_none() {
                self.opened_at = Some(now);
            }
            ctx.record(
                now,
                EntryDraft::new(spec.meta.node_id.clone(), HistoryAction::Enqueued)
                    .token(token.id())
                    .value(token.value().clone())
                    .details(json!({"from": delivery.from, "buffered": self.buffer.len() + 1})),
            );
            self.buffer.push(token);

            if spec.capacity.map_or(false, |cap| self.buffer.len() >= cap) {
                out.extend(self.flush(spec, now, ctx));
            }
        }

        out
    }

    fn flush(&mut self, spec: &QueueNode, now: SimTime, ctx: &mut RunContext) -> Option<Emission> {
        let buffered = std::mem::take(&mut self.buffer);
        let opened_at = self.opened_at.take();
        if buffered.is_empty() {
            return None;
        }
        let parents: Vec<String> = buffered.iter().map(|t| t.id().to_string()).collect();

        match aggregate(spec.method, &buffered) {
            Ok(value) => {
                debug!(
                    node_id = %spec.meta.node_id,
                    method = spec.method.as_str(),
                    count = buffered.len(),
                    "queue window flushed"
                );
                let details = json!({
                    "method": spec.method.as_str(),
                    "count": buffered.len(),
                    "windowStart": opened_at,
                    "inputs": buffered.iter().map(|t| t.value().clone()).collect::<Vec<_>>(),
                });
                let token = ctx.create_token(
                    now,
                    &spec.meta,
                    value,
                    parents,
                    HistoryAction::Aggregated(spec.method),
                    Some(details),
                );
                Some(Emission::new(spec.destination.clone(), token))
            }
            Err(error) => {
                warn!(node_id = %spec.meta.node_id, %error, "queue aggregation failed; window discarded");
                ctx.record(
                    now,
                    EntryDraft::new(spec.meta.node_id.clone(), HistoryAction::Error)
                        .details(json!({
                            "error": error.to_string(),
                            "method": spec.method.as_str(),
                            "discarded": parents,
                        })),
                );
                None
            }
        }
    }
}

/// Combine buffered values
pub fn aggregate(method: AggregationMethod, tokens: &[Token]) -> Result<Value, AggregationError> {
    let numbers = |name: &'static str| -> Result<Vec<f64>, AggregationError> {
        tokens
            .iter()
            .map(|t| {
                t.value().as_f64().ok_or_else(|| AggregationError::NonNumeric {
                    method: name,
                    token_id: t.id().to_string(),
                    found: t.value().to_string(),
                })
            })
            .collect()
    };

    match method {
        AggregationMethod::Sum => {
            let total: f64 = numbers("sum")?.iter().sum();
            number_value(total).map_err(|_| AggregationError::NonFinite)
        }
        AggregationMethod::Average => {
            let values = numbers("average")?;
            if values.is_empty() {
                return Ok(Value::Null);
            }
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            number_value(mean).map_err(|_| AggregationError::NonFinite)
        }
        AggregationMethod::Count => Ok(Value::from(tokens.len() as u64)),
        AggregationMethod::First => Ok(tokens.first().map_or(Value::Null, |t| t.value().clone())),
        AggregationMethod::Last => Ok(tokens.last().map_or(Value::Null, |t| t.value().clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::WallClock;
    use crate::scenario::model::NodeMeta;

    fn tok(id: &str, value: Value) -> Token {
        Token::new(id.into(), value, 0, "src".into(), vec![])
    }

    fn deliver(id: &str, value: Value) -> Vec<Delivery> {
        vec![Delivery {
            from: "src".into(),
            token: tok(id, value),
        }]
    }

    fn queue(method: AggregationMethod, capacity: Option<usize>) -> QueueNode {
        QueueNode {
            meta: NodeMeta {
                node_id: "q".into(),
                display_name: "Q".into(),
            },
            time_window: 3,
            method,
            capacity,
            destination: "sink".into(),
        }
    }

    #[test]
    fn test_aggregate_methods() {
        let tokens = vec![tok("a", json!(4)), tok("b", json!(160)), tok("c", json!(10))];
        assert_eq!(aggregate(AggregationMethod::Sum, &tokens).unwrap(), json!(174));
        assert_eq!(aggregate(AggregationMethod::Average, &tokens).unwrap(), json!(58));
        assert_eq!(aggregate(AggregationMethod::Count, &tokens).unwrap(), json!(3));
        assert_eq!(aggregate(AggregationMethod::First, &tokens).unwrap(), json!(4));
        assert_eq!(aggregate(AggregationMethod::Last, &tokens).unwrap(), json!(10));

        let mixed = vec![tok("a", json!(1)), tok("b", json!("x"))];
        assert!(matches!(
            aggregate(AggregationMethod::Sum, &mixed),
            Err(AggregationError::NonNumeric { .. })
        ));
        assert_eq!(aggregate(AggregationMethod::Last, &mixed).unwrap(), json!("x"));
    }

    #[test]
    fn test_window_boundary_closes_before_arrivals() {
        let spec = queue(AggregationMethod::Sum, None);
        let mut state = QueueState::default();
        let mut ctx = RunContext::new(0, WallClock::System);

        assert!(state.on_tick(&spec, 1, deliver("a", json!(4)), &mut ctx).is_empty());
        assert!(state.on_tick(&spec, 2, deliver("b", json!(160)), &mut ctx).is_empty());
        assert!(state.on_tick(&spec, 3, deliver("c", json!(10)), &mut ctx).is_empty());

        // t = 4 = openedAt + timeWindow: flush first, then buffer "d"
        let out = state.on_tick(&spec, 4, deliver("d", json!(1)), &mut ctx);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].token.value(), &json!(174));
        assert_eq!(out[0].token.parent_token_ids(), &["a", "b", "c"]);
        assert_eq!(state.buffer.len(), 1);
        assert_eq!(state.opened_at, Some(4));
    }

    #[test]
    fn test_capacity_flushes_immediately() {
        let spec = queue(AggregationMethod::Count, Some(2));
        let mut state = QueueState::default();
        let mut ctx = RunContext::new(0, WallClock::System);

        let mut inbox = deliver("a", json!(1));
        inbox.extend(deliver("b", json!(2)));
        inbox.extend(deliver("c", json!(3)));
        let out = state.on_tick(&spec, 1, inbox, &mut ctx);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].token.value(), &json!(2));
        assert_eq!(state.buffer.len(), 1);
    }

    #[test]
    fn test_non_numeric_sum_discards_window() {
        let spec = queue(AggregationMethod::Sum, None);
        let mut state = QueueState::default();
        let mut ctx = RunContext::new(0, WallClock::System);

        state.on_tick(&spec, 1, deliver("a", json!("oops")), &mut ctx);
        let out = state.on_tick(&spec, 4, Vec::new(), &mut ctx);
        assert!(out.is_empty());
        assert!(state.buffer.is_empty());
        let last = ctx.log().entries().last().unwrap();
        assert_eq!(last.action, HistoryAction::Error);
        assert_eq!(ctx.tokens_created(), 0);
    }
}
