//! DataSource runtime
//!
//! Emits one token on every tick where `t mod interval == 0`. Values are
//! sampled uniformly from `[valueMin, valueMax]` (integers when both bounds
//! are whole numbers), or taken in order from a scripted `sequence`, after
//! which the source goes quiet.

use crate::core::time::SimTime;
use crate::models::history::HistoryAction;
use crate::rng::SeededRng;
use crate::runtime::context::{Delivery, Emission, RunContext};
use crate::scenario::model::DataSourceNode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceState {
    /// Tokens emitted so far (position in the scripted sequence)
    pub emitted: u64,
}

impl DataSourceState {
    pub fn on_tick(
        &mut self,
        spec: &DataSourceNode,
        now: SimTime,
        inbox: Vec<Delivery>,
        ctx: &mut RunContext,
    ) -> Vec<Emission> {
        if !inbox.is_empty() {
            warn!(node_id = %spec.meta.node_id, dropped = inbox.len(), "data source received tokens");
        }
        if now % spec.interval != 0 {
            return Vec::new();
        }

        let value = match &spec.sequence {
            Some(sequence) => match sequence.get(self.emitted as usize) {
                Some(value) => value.clone(),
                None => return Vec::new(),
            },
            None => sample(ctx.rng_mut(), spec.value_min, spec.value_max),
        };
        self.emitted += 1;

        let token = ctx.create_token(now, &spec.meta, value, Vec::new(), HistoryAction::Created, None);
        vec![Emission::new(spec.destination.clone(), token)]
    }
}

/// Uniform sample from `[min, max]`
pub fn sample(rng: &mut SeededRng, min: f64, max: f64) -> Value {
    let whole = |x: f64| x.fract() == 0.0 && x.abs() < i64::MAX as f64;
    if whole(min) && whole(max) {
        Value::from(rng.uniform_int(min as i64, max as i64))
    } else {
        Value::from(rng.uniform_f64(min, max))
    }
}
