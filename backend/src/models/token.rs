//! Token model
//!
//! A token is an immutable unit of data flowing through the node graph. It
//! carries its provenance (the ids of the tokens it was derived from) from the
//! moment of creation.
//!
//! Token ids are minted from a per-run counter (`tok_00000001`, ...) rather
//! than random UUIDs so a rerun of the same scenario and seed reproduces the
//! same ids and therefore the same activity log.

use crate::core::time::SimTime;
use serde::{Deserialize, Serialize};

/// Token identifier
pub type TokenId = String;

/// Scenario node identifier
pub type NodeId = String;

/// Immutable token
///
/// # Example
/// ```
/// use workflow_simulator_core_rs::Token;
/// use serde_json::json;
///
/// let token = Token::new("tok_00000001".to_string(), json!(4), 2, "src".to_string(), vec![]);
/// assert!(token.is_source());
/// assert_eq!(token.value(), &json!(4));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    id: TokenId,
    value: serde_json::Value,
    created_at: SimTime,
    origin_node_id: NodeId,
    #[serde(default)]
    parent_token_ids: Vec<TokenId>,
}

impl Token {
    pub fn new(
        id: TokenId,
        value: serde_json::Value,
        created_at: SimTime,
        origin_node_id: NodeId,
        parent_token_ids: Vec<TokenId>,
    ) -> Self {
        Self {
            id,
            value,
            created_at,
            origin_node_id,
            parent_token_ids,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.value
    }

    pub fn created_at(&self) -> SimTime {
        self.created_at
    }

    pub fn origin_node_id(&self) -> &str {
        &self.origin_node_id
    }

    pub fn parent_token_ids(&self) -> &[TokenId] {
        &self.parent_token_ids
    }

    /// True when the token has no parents (generated, not derived)
    pub fn is_source(&self) -> bool {
        self.parent_token_ids.is_empty()
    }
}

/// Format the n-th token id of a run
pub fn format_token_id(n: u64) -> TokenId {
    format!("tok_{:08}", n)
}

/// Format the n-th FSM message id of a run
pub fn format_message_id(n: u64) -> String {
    format!("msg_{:08}", n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_token_ids_are_zero_padded() {
        assert_eq!(format_token_id(42), "tok_00000042");
        assert_eq!(format_message_id(7), "msg_00000007");
    }

    #[test]
    fn test_token_wire_format_is_camel_case() {
        let token = Token::new(
            "tok_00000003".to_string(),
            json!(174),
            6,
            "window".to_string(),
            vec!["tok_00000001".to_string(), "tok_00000002".to_string()],
        );
        let wire = serde_json::to_value(&token).unwrap();
        assert_eq!(wire["createdAt"], json!(6));
        assert_eq!(wire["originNodeId"], json!("window"));
        assert_eq!(wire["parentTokenIds"].as_array().unwrap().len(), 2);
        assert!(!token.is_source());
    }
}
