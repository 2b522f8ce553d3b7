//! Per-run execution context
//!
//! Everything a node runtime may touch besides its own state: the activity
//! log, the lineage tracker, the RNG and the id counters. One context is owned
//! by one engine; there is no process-wide registry.

use crate::core::time::{SimTime, WallClock};
use crate::lineage::TokenLineageTracker;
use crate::models::history::{ActivityLog, EntryDraft, HistoryAction};
use crate::models::token::{format_message_id, format_token_id, NodeId, Token, TokenId};
use crate::rng::SeededRng;
use crate::scenario::NodeMeta;
use serde::{Deserialize, Serialize};

/// A token handed to a node, with the node that sent it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub from: NodeId,
    pub token: Token,
}

/// A token a node wants delivered downstream
#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    pub destination: NodeId,
    pub token: Token,
}

impl Emission {
    pub fn new(destination: impl Into<NodeId>, token: Token) -> Self {
        Self {
            destination: destination.into(),
            token,
        }
    }
}

/// Mutable run state shared by all node runtimes during a tick
#[derive(Debug, Clone)]
pub struct RunContext {
    log: ActivityLog,
    tracker: TokenLineageTracker,
    rng: SeededRng,
    wall_clock: WallClock,
    /// Number of the next token id to mint
    next_token_id: u64,
    next_message_id: u64,
}

impl RunContext {
    pub fn new(rng_seed: u64, wall_clock: WallClock) -> Self {
        Self {
            log: ActivityLog::new(),
            tracker: TokenLineageTracker::new(),
            rng: SeededRng::new(rng_seed),
            wall_clock,
            next_token_id: 1,
            next_message_id: 1,
        }
    }

    /// Rebuild from checkpointed parts; the tracker is replayed from the log
    pub(crate) fn from_parts(
        log: ActivityLog,
        rng_state: u64,
        wall_clock: WallClock,
        next_token_id: u64,
        next_message_id: u64,
        node_names: &dyn Fn(&str) -> String,
    ) -> Self {
        let mut tracker = TokenLineageTracker::new();
        for entry in log.entries() {
            match (&entry.token_id, entry.action) {
                (Some(token_id), action) if action.is_token_creation() => {
                    let token = Token::new(
                        token_id.clone(),
                        entry.value.clone().unwrap_or(serde_json::Value::Null),
                        entry.timestamp,
                        entry.node_id.clone(),
                        entry.source_token_ids.clone(),
                    );
                    tracker.register_token(&token, &node_names(&entry.node_id), action);
                }
                (Some(token_id), HistoryAction::Consumed) => {
                    tracker.mark_consumed(token_id);
                }
                _ => {}
            }
        }

        Self {
            log,
            tracker,
            rng: SeededRng::from_state(rng_state),
            wall_clock,
            next_token_id,
            next_message_id,
        }
    }

    /// Append an entry stamped with `now`
    pub fn record(&mut self, now: SimTime, draft: EntryDraft) -> u64 {
        let epoch = self.wall_clock.epoch_ms(now);
        self.log.append(draft.at(now, epoch))
    }

    /// Mint a token, log its creation and register it for lineage
    pub fn create_token(
        &mut self,
        now: SimTime,
        origin: &NodeMeta,
        value: serde_json::Value,
        parents: Vec<TokenId>,
        action: HistoryAction,
        details: Option<serde_json::Value>,
    ) -> Token {
        let id = format_token_id(self.next_token_id);
        self.next_token_id += 1;
        let token = Token::new(id, value, now, origin.node_id.clone(), parents);

        let mut draft = EntryDraft::new(origin.node_id.clone(), action)
            .token(token.id())
            .value(token.value().clone())
            .sources(token.parent_token_ids().to_vec());
        if let Some(details) = details {
            draft = draft.details(details);
        }
        self.record(now, draft);
        self.tracker.register_token(&token, &origin.display_name, action);
        token
    }

    /// Next FSM message id
    pub fn mint_message_id(&mut self) -> String {
        let id = format_message_id(self.next_message_id);
        self.next_message_id += 1;
        id
    }

    pub fn log(&self) -> &ActivityLog {
        &self.log
    }

    pub fn tracker(&self) -> &TokenLineageTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut TokenLineageTracker {
        &mut self.tracker
    }

    pub fn rng_mut(&mut self) -> &mut SeededRng {
        &mut self.rng
    }

    pub fn rng_state(&self) -> u64 {
        self.rng.state()
    }

    pub fn wall_clock(&self) -> WallClock {
        self.wall_clock
    }

    pub fn next_token_id(&self) -> u64 {
        self.next_token_id
    }

    pub fn next_message_id(&self) -> u64 {
        self.next_message_id
    }

    /// Number of tokens minted so far
    pub fn tokens_created(&self) -> u64 {
        self.next_token_id - 1
    }

    /// Clear log, lineage and counters in one step
    pub fn reset(&mut self, rng_seed: u64) {
        self.log.clear();
        self.tracker.clear_all();
        self.rng = SeededRng::new(rng_seed);
        self.next_token_id = 1;
        self.next_message_id = 1;
    }
}
