//! Domain models for the workflow simulator

pub mod history;
pub mod token;

// Re-exports
pub use history::{ActivityLog, EntryDraft, HistoryAction, HistoryEntry, HistoryFilter};
pub use token::{NodeId, Token, TokenId};
