//! Sink runtime - terminal consumption

use crate::core::time::SimTime;
use crate::models::history::{EntryDraft, HistoryAction};
use crate::runtime::context::{Delivery, Emission, RunContext};
use crate::scenario::model::SinkNode;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkState {
    pub consumed: u64,
}

impl SinkState {
    pub fn on_tick(
        &mut self,
        spec: &SinkNode,
        now: SimTime,
        inbox: Vec<Delivery>,
        ctx: &mut RunContext,
    ) -> Vec<Emission> {
        for delivery in inbox {
            let token = delivery.token;
            ctx.record(
                now,
                EntryDraft::new(spec.meta.node_id.clone(), HistoryAction::Consumed)
                    .token(token.id())
                    .value(token.value().clone())
                    .details(json!({"from": delivery.from})),
            );
            ctx.tracker_mut().mark_consumed(token.id());
            self.consumed += 1;
        }
        Vec::new()
    }
}
