//! Activity log for simulation replay and auditing.
//!
//! Every observable state change in the engine is recorded as one
//! [`HistoryEntry`] with a fresh, strictly increasing global `sequence`.
//! The log is the single source of truth the token graph is rebuilt from.
//!
//! # Critical Invariants
//!
//! 1. Append-only: entries are never mutated or removed (a full engine reset
//!    is the only way the log is cleared).
//! 2. `sequence` is strictly increasing and breaks ties between entries that
//!    share a `timestamp`.
//! 3. Token provenance travels in structured fields (`token_id`,
//!    `source_token_ids`), never inside free-text `details`.

use crate::core::time::SimTime;
use crate::models::token::{NodeId, TokenId};
use crate::scenario::types::AggregationMethod;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Kind of state change recorded by a history entry
///
/// Serializes as an upper-snake keyword (`CREATED`, `AGGREGATED_SUM`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum HistoryAction {
    /// New token created (DataSource emission, ProcessNode output, FSM emit)
    Created,
    /// Queue flushed its window into one aggregated token
    Aggregated(AggregationMethod),
    /// One of several tokens derived from the same inputs in one round
    Split,
    /// Token buffered by a Queue
    Enqueued,
    /// Token stored in a ProcessNode input slot
    InputBuffered,
    /// FSM moved between states
    Transition,
    /// FSM received a message with no matching transition
    TriggerIgnored,
    /// FSM onEntry `log` action
    FsmLog,
    /// StateMultiplexer forwarded a token on a route
    Routed,
    /// Sink consumed a token
    Consumed,
    /// Recoverable evaluation failure
    Error,
}

impl HistoryAction {
    /// Actions that bring a new token into existence
    pub fn is_token_creation(&self) -> bool {
        matches!(
            self,
            HistoryAction::Created | HistoryAction::Aggregated(_) | HistoryAction::Split
        )
    }
}

impl fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryAction::Created => f.write_str("CREATED"),
            HistoryAction::Aggregated(method) => {
                write!(f, "AGGREGATED_{}", method.as_str().to_ascii_uppercase())
            }
            HistoryAction::Split => f.write_str("SPLIT"),
            HistoryAction::Enqueued => f.write_str("ENQUEUED"),
            HistoryAction::InputBuffered => f.write_str("INPUT_BUFFERED"),
            HistoryAction::Transition => f.write_str("TRANSITION"),
            HistoryAction::TriggerIgnored => f.write_str("TRIGGER_IGNORED"),
            HistoryAction::FsmLog => f.write_str("FSM_LOG"),
            HistoryAction::Routed => f.write_str("ROUTED"),
            HistoryAction::Consumed => f.write_str("CONSUMED"),
            HistoryAction::Error => f.write_str("ERROR"),
        }
    }
}

/// Unrecognized action keyword
#[derive(Debug, Error, Clone, PartialEq)]
#[error("Unknown history action: {0}")]
pub struct UnknownAction(pub String);

impl FromStr for HistoryAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(method) = s.strip_prefix("AGGREGATED_") {
            return method
                .to_ascii_lowercase()
                .parse::<AggregationMethod>()
                .map(HistoryAction::Aggregated)
                .map_err(|_| UnknownAction(s.to_string()));
        }
        match s {
            "CREATED" => Ok(HistoryAction::Created),
            "SPLIT" => Ok(HistoryAction::Split),
            "ENQUEUED" => Ok(HistoryAction::Enqueued),
            "INPUT_BUFFERED" => Ok(HistoryAction::InputBuffered),
            "TRANSITION" => Ok(HistoryAction::Transition),
            "TRIGGER_IGNORED" => Ok(HistoryAction::TriggerIgnored),
            "FSM_LOG" => Ok(HistoryAction::FsmLog),
            "ROUTED" => Ok(HistoryAction::Routed),
            "CONSUMED" => Ok(HistoryAction::Consumed),
            "ERROR" => Ok(HistoryAction::Error),
            other => Err(UnknownAction(other.to_string())),
        }
    }
}

impl From<HistoryAction> for String {
    fn from(action: HistoryAction) -> Self {
        action.to_string()
    }
}

impl TryFrom<String> for HistoryAction {
    type Error = UnknownAction;

    fn try_from(value: String) -> Result<Self, UnknownAction> {
        value.parse()
    }
}

/// One row of the activity log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Global, strictly increasing sequence number (starts at 1)
    pub sequence: u64,

    /// Simulated time
    pub timestamp: SimTime,

    /// Wall-clock time in epoch milliseconds
    pub epoch_timestamp: u64,

    pub node_id: NodeId,

    pub action: HistoryAction,

    /// Token this entry is about (created, buffered, routed, consumed, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<TokenId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,

    /// Structured traceability payload (formula, inputs, route, error, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Declared provenance: ids of the tokens this entry's token derives from
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_token_ids: Vec<TokenId>,
}

/// An entry before the log assigns its sequence number
#[derive(Debug, Clone, PartialEq)]
pub struct EntryDraft {
    pub timestamp: SimTime,
    pub epoch_timestamp: u64,
    pub node_id: NodeId,
    pub action: HistoryAction,
    pub token_id: Option<TokenId>,
    pub value: Option<serde_json::Value>,
    pub details: Option<serde_json::Value>,
    pub source_token_ids: Vec<TokenId>,
}

impl EntryDraft {
    pub fn new(node_id: impl Into<NodeId>, action: HistoryAction) -> Self {
        Self {
            timestamp: 0,
            epoch_timestamp: 0,
            node_id: node_id.into(),
            action,
            token_id: None,
            value: None,
            details: None,
            source_token_ids: Vec::new(),
        }
    }

    pub fn at(mut self, timestamp: SimTime, epoch_timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self.epoch_timestamp = epoch_timestamp;
        self
    }

    pub fn token(mut self, token_id: impl Into<TokenId>) -> Self {
        self.token_id = Some(token_id.into());
        self
    }

    pub fn value(mut self, value: serde_json::Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn sources(mut self, source_token_ids: Vec<TokenId>) -> Self {
        self.source_token_ids = source_token_ids;
        self
    }
}

/// Filter for [`ActivityLog::query`]; every set field must match
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryFilter {
    pub node_id: Option<NodeId>,
    pub action: Option<HistoryAction>,
    pub token_id: Option<TokenId>,
    /// Inclusive lower bound on simulated time
    pub from_time: Option<SimTime>,
    /// Inclusive upper bound on simulated time
    pub to_time: Option<SimTime>,
    /// Only entries with `sequence > since_sequence`
    pub since_sequence: Option<u64>,
}

impl HistoryFilter {
    pub fn node(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: Some(node_id.into()),
            ..Self::default()
        }
    }

    pub fn action(action: HistoryAction) -> Self {
        Self {
            action: Some(action),
            ..Self::default()
        }
    }

    pub fn matches(&self, entry: &HistoryEntry) -> bool {
        self.node_id.as_ref().map_or(true, |n| *n == entry.node_id)
            && self.action.map_or(true, |a| a == entry.action)
            && self
                .token_id
                .as_ref()
                .map_or(true, |t| entry.token_id.as_ref() == Some(t))
            && self.from_time.map_or(true, |t| entry.timestamp >= t)
            && self.to_time.map_or(true, |t| entry.timestamp <= t)
            && self.since_sequence.map_or(true, |s| entry.sequence > s)
    }
}

/// Restoring a log from entries that are not strictly increasing
#[derive(Debug, Error, Clone, PartialEq)]
#[error("History sequence {found} does not follow {previous}")]
pub struct SequenceError {
    pub previous: u64,
    pub found: u64,
}

/// Append-only activity log
#[derive(Debug, Clone, Default)]
pub struct ActivityLog {
    entries: Vec<HistoryEntry>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from persisted entries
    pub fn from_entries(entries: Vec<HistoryEntry>) -> Result<Self, SequenceError> {
        let mut previous = 0;
        for entry in &entries {
            if entry.sequence <= previous {
                return Err(SequenceError {
                    previous,
                    found: entry.sequence,
                });
            }
            previous = entry.sequence;
        }
        Ok(Self { entries })
    }

    /// Append an entry and return its sequence number
    pub fn append(&mut self, draft: EntryDraft) -> u64 {
        let sequence = self.last_sequence() + 1;
        self.entries.push(HistoryEntry {
            sequence,
            timestamp: draft.timestamp,
            epoch_timestamp: draft.epoch_timestamp,
            node_id: draft.node_id,
            action: draft.action,
            token_id: draft.token_id,
            value: draft.value,
            details: draft.details,
            source_token_ids: draft.source_token_ids,
        });
        sequence
    }

    /// Sequence of the most recent entry (0 when empty)
    pub fn last_sequence(&self) -> u64 {
        self.entries.last().map(|e| e.sequence).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Entries appended after `sequence` (for readers polling a growing log)
    pub fn entries_since(&self, sequence: u64) -> &[HistoryEntry] {
        let start = self.entries.partition_point(|e| e.sequence <= sequence);
        &self.entries[start..]
    }

    pub fn query(&self, filter: &HistoryFilter) -> Vec<HistoryEntry> {
        let candidates = match filter.since_sequence {
            Some(seq) => self.entries_since(seq),
            None => &self.entries[..],
        };
        candidates
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    /// Entries for one node, in sequence order
    pub fn for_node(&self, node_id: &str) -> Vec<&HistoryEntry> {
        self.entries.iter().filter(|e| e.node_id == node_id).collect()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn draft(node: &str, action: HistoryAction, t: SimTime) -> EntryDraft {
        EntryDraft::new(node, action).at(t, 1_000 + t)
    }

    #[test]
    fn test_action_keywords_roundtrip() {
        let actions = [
            HistoryAction::Created,
            HistoryAction::Aggregated(AggregationMethod::Sum),
            HistoryAction::Aggregated(AggregationMethod::Average),
            HistoryAction::Split,
            HistoryAction::TriggerIgnored,
            HistoryAction::Error,
        ];
        for action in actions {
            let parsed: HistoryAction = action.to_string().parse().unwrap();
            assert_eq!(parsed, action);
        }
        assert_eq!(
            HistoryAction::Aggregated(AggregationMethod::Count).to_string(),
            "AGGREGATED_COUNT"
        );
        assert!("AGGREGATED_MEDIAN".parse::<HistoryAction>().is_err());
    }

    #[test]
    fn test_creation_actions() {
        assert!(HistoryAction::Created.is_token_creation());
        assert!(HistoryAction::Aggregated(AggregationMethod::Last).is_token_creation());
        assert!(HistoryAction::Split.is_token_creation());
        assert!(!HistoryAction::Routed.is_token_creation());
        assert!(!HistoryAction::Consumed.is_token_creation());
    }

    #[test]
    fn test_append_assigns_increasing_sequence() {
        let mut log = ActivityLog::new();
        assert_eq!(log.append(draft("a", HistoryAction::Created, 1)), 1);
        assert_eq!(log.append(draft("a", HistoryAction::Created, 1)), 2);
        assert_eq!(log.append(draft("b", HistoryAction::Consumed, 1)), 3);
        assert_eq!(log.last_sequence(), 3);
    }

    #[test]
    fn test_entries_since() {
        let mut log = ActivityLog::new();
        for t in 0..5 {
            log.append(draft("a", HistoryAction::Created, t));
        }
        let tail = log.entries_since(3);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].sequence, 4);
        assert!(log.entries_since(5).is_empty());
    }

    #[test]
    fn test_query_filters_combine() {
        let mut log = ActivityLog::new();
        log.append(draft("src", HistoryAction::Created, 1).token("t1"));
        log.append(draft("sink", HistoryAction::Consumed, 1).token("t1"));
        log.append(draft("src", HistoryAction::Created, 2).token("t2"));

        assert_eq!(log.query(&HistoryFilter::node("src")).len(), 2);
        assert_eq!(log.query(&HistoryFilter::action(HistoryAction::Consumed)).len(), 1);

        let filter = HistoryFilter {
            node_id: Some("src".into()),
            from_time: Some(2),
            ..HistoryFilter::default()
        };
        let hits = log.query(&filter);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].token_id.as_deref(), Some("t2"));

        let by_token = HistoryFilter {
            token_id: Some("t1".into()),
            ..HistoryFilter::default()
        };
        assert_eq!(log.query(&by_token).len(), 2);
    }

    #[test]
    fn test_entry_wire_format() {
        let mut log = ActivityLog::new();
        log.append(
            draft("window", HistoryAction::Aggregated(AggregationMethod::Sum), 4)
                .token("t9")
                .value(json!(174))
                .sources(vec!["t1".into(), "t2".into()]),
        );
        let wire = serde_json::to_value(&log.entries()[0]).unwrap();
        assert_eq!(wire["action"], json!("AGGREGATED_SUM"));
        assert_eq!(wire["epochTimestamp"], json!(1_004));
        assert_eq!(wire["sourceTokenIds"], json!(["t1", "t2"]));
        assert!(wire.get("details").is_none());

        let back: HistoryEntry = serde_json::from_value(wire).unwrap();
        assert_eq!(&back, &log.entries()[0]);
    }

    #[test]
    fn test_from_entries_rejects_non_increasing_sequence() {
        let mut log = ActivityLog::new();
        log.append(draft("a", HistoryAction::Created, 1));
        log.append(draft("a", HistoryAction::Created, 2));
        let mut entries = log.entries().to_vec();
        entries.swap(0, 1);
        assert_eq!(
            ActivityLog::from_entries(entries).unwrap_err(),
            SequenceError {
                previous: 2,
                found: 1
            }
        );
    }
}
