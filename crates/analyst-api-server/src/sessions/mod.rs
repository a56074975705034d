//! Per-session conversation history
//!
//! Provides the in-memory store backing `/analyze`, `/followup` and `/clear-chat`:
//! - Thread-safe keyed storage (DashMap, one shard lock per key)
//! - Append-only exchange history with explicit clear
//! - TTL, session-count and history-length bounds enforced on mutation

mod store;
mod sweeper;
pub mod types;

pub use store::{SessionStore, StoreLimits};
pub use sweeper::spawn_sweeper;
pub use types::{Exchange, ExchangeKind, Session, SessionKey};
