use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

use crate::models::chat::ChatMessage;

pub type SessionKey = String;

/// Which endpoint produced an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Analysis,
    Followup,
}

/// One prompt/response pair, replayed in order as conversation context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub kind: ExchangeKind,
    pub prompt: String,
    pub response: String,
    pub created_at: DateTime<Utc>,
}

impl Exchange {
    pub fn new(kind: ExchangeKind, prompt: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            kind,
            prompt: prompt.into(),
            response: response.into(),
            created_at: Utc::now(),
        }
    }

    /// The exchange as a user/assistant message pair.
    pub fn to_messages(&self) -> [ChatMessage; 2] {
        [
            ChatMessage::user(self.prompt.clone()),
            ChatMessage::assistant(self.response.clone()),
        ]
    }

    pub fn char_len(&self) -> usize {
        self.prompt.chars().count() + self.response.chars().count()
    }
}

/// Conversation state stored in the session store
#[derive(Debug, Clone)]
pub struct Session {
    pub key: SessionKey,

    /// Insertion-ordered history
    pub exchanges: Vec<Exchange>,

    /// Creation time, drives TTL and oldest-first eviction
    pub created_at: Instant,

    /// Bumped by every clear; writers that read history before a clear
    /// use it to detect that their context was discarded.
    pub generation: u64,
}

impl Session {
    pub fn new(key: impl Into<SessionKey>) -> Self {
        Self {
            key: key.into(),
            exchanges: Vec::new(),
            created_at: Instant::now(),
            generation: 0,
        }
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() > ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_to_messages_keeps_roles() {
        let exchange = Exchange::new(ExchangeKind::Followup, "fix tone", "done");
        let [user, assistant] = exchange.to_messages();
        assert_eq!(user, ChatMessage::user("fix tone"));
        assert_eq!(assistant, ChatMessage::assistant("done"));
    }

    #[test]
    fn test_char_len_counts_chars_not_bytes() {
        let exchange = Exchange::new(ExchangeKind::Analysis, "сайт", "ok");
        assert_eq!(exchange.char_len(), 6);
    }

    #[test]
    fn test_fresh_session_not_expired() {
        let session = Session::new("s1");
        assert!(session.exchanges.is_empty());
        assert_eq!(session.generation, 0);
        assert!(!session.is_expired(Duration::from_secs(60)));
    }
}
