use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::types::{Exchange, Session, SessionKey};
use crate::config::SessionsConfig;

/// Bounds applied inside the store's mutation path.
#[derive(Debug, Clone)]
pub struct StoreLimits {
    pub ttl: Duration,
    /// 0 = unlimited
    pub max_sessions: usize,
    /// 0 = unlimited
    pub max_exchanges: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self::from(&SessionsConfig::default())
    }
}

impl From<&SessionsConfig> for StoreLimits {
    fn from(cfg: &SessionsConfig) -> Self {
        Self {
            ttl: Duration::from_secs(cfg.ttl_hours.saturating_mul(60 * 60)),
            max_sessions: cfg.max_sessions,
            max_exchanges: cfg.max_exchanges,
        }
    }
}

/// Thread-safe in-memory session store.
///
/// Every operation on a key runs under that key's DashMap shard lock, so
/// appends, clears and history reads for one session never interleave.
/// Callers take a history snapshot, release it, and only then talk to the
/// model provider.
#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<DashMap<SessionKey, Session>>,
    limits: StoreLimits,
}

impl SessionStore {
    pub fn new(limits: StoreLimits) -> Self {
        info!(
            "Initializing session store: ttl={:?}, max_sessions={}, max_exchanges={}",
            limits.ttl, limits.max_sessions, limits.max_exchanges
        );
        Self {
            storage: Arc::new(DashMap::new()),
            limits,
        }
    }

    /// Returns the live session for `key`, creating an empty one if absent or expired.
    pub fn get_or_create(&self, key: &str) -> Session {
        self.with_session_mut(key, |session| session.clone())
    }

    /// Appends one exchange, creating the session if needed.
    /// Returns the history length after the append.
    pub fn append_exchange(&self, key: &str, exchange: Exchange) -> usize {
        let max_exchanges = self.limits.max_exchanges;
        self.with_session_mut(key, |session| push_exchange(session, exchange, max_exchanges))
    }

    /// Appends only if the session has not been cleared since `generation`
    /// was read with [`SessionStore::history_snapshot`].
    /// Returns the history length after the append, or `None` when skipped.
    pub fn append_exchange_at(
        &self,
        key: &str,
        exchange: Exchange,
        generation: u64,
    ) -> Option<usize> {
        let max_exchanges = self.limits.max_exchanges;
        self.with_session_mut(key, |session| {
            if session.generation != generation {
                debug!(
                    "Session {} changed generation ({} -> {}), exchange dropped",
                    session.key, generation, session.generation
                );
                return None;
            }
            Some(push_exchange(session, exchange, max_exchanges))
        })
    }

    /// Snapshot of the history in insertion order; empty for unknown keys.
    pub fn get_history(&self, key: &str) -> Vec<Exchange> {
        self.history_snapshot(key).0
    }

    /// History plus the session's clear generation (0 for unknown keys).
    pub fn history_snapshot(&self, key: &str) -> (Vec<Exchange>, u64) {
        let expired = match self.storage.get(key) {
            Some(entry) if !entry.is_expired(self.limits.ttl) => {
                return (entry.exchanges.clone(), entry.generation);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.remove_if_expired(key);
        }
        (Vec::new(), 0)
    }

    /// Empties the history; unknown keys are a no-op.
    /// Returns the number of exchanges removed.
    pub fn clear(&self, key: &str) -> usize {
        let expired = match self.storage.get_mut(key) {
            Some(mut entry) if !entry.is_expired(self.limits.ttl) => {
                let removed = entry.exchanges.len();
                entry.exchanges.clear();
                entry.generation += 1;
                return removed;
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.remove_if_expired(key);
        }
        0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.storage
            .get(key)
            .is_some_and(|entry| !entry.is_expired(self.limits.ttl))
    }

    /// Number of stored sessions (expired ones linger until swept)
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Drops expired sessions. Returns number of sessions removed.
    pub fn cleanup_expired(&self) -> usize {
        let ttl = self.limits.ttl;
        let start_len = self.storage.len();
        self.storage.retain(|_, session| !session.is_expired(ttl));
        let count = start_len.saturating_sub(self.storage.len());

        if count > 0 {
            info!("Cleaned up {} expired sessions", count);
        }

        count
    }

    /// Runs `f` on the live session for `key` under its shard lock.
    fn with_session_mut<R>(&self, key: &str, f: impl FnOnce(&mut Session) -> R) -> R {
        let ttl = self.limits.ttl;
        let (result, created) = {
            let mut created = false;
            let mut entry = self.storage.entry(key.to_string()).or_insert_with(|| {
                created = true;
                Session::new(key)
            });
            if entry.is_expired(ttl) {
                debug!("Session {} expired, starting fresh", key);
                *entry = Session::new(key);
                created = true;
            }
            (f(entry.value_mut()), created)
        };

        if created {
            debug!("Created session {}", key);
            self.enforce_session_cap(key);
        }
        result
    }

    /// Evicts the oldest sessions (never `protect`) until the cap holds.
    /// Must be called without holding any entry guard.
    fn enforce_session_cap(&self, protect: &str) {
        let max_sessions = self.limits.max_sessions;
        if max_sessions == 0 || self.storage.len() <= max_sessions {
            return;
        }

        let mut candidates: Vec<(SessionKey, std::time::Instant)> = self
            .storage
            .iter()
            .filter(|entry| entry.key() != protect)
            .map(|entry| (entry.key().clone(), entry.created_at))
            .collect();
        candidates.sort_by_key(|(_, created_at)| *created_at);

        let excess = self.storage.len().saturating_sub(max_sessions);
        let mut evicted = 0;
        for (key, _) in candidates.into_iter().take(excess) {
            if self.storage.remove(&key).is_some() {
                evicted += 1;
            }
        }

        if evicted > 0 {
            info!("Evicted {} oldest session(s) (limit {})", evicted, max_sessions);
        }
    }

    fn remove_if_expired(&self, key: &str) {
        let ttl = self.limits.ttl;
        if self
            .storage
            .remove_if(key, |_, session| session.is_expired(ttl))
            .is_some()
        {
            debug!("Session {} expired, removed from store", key);
        }
    }
}

fn push_exchange(session: &mut Session, exchange: Exchange, max_exchanges: usize) -> usize {
    session.exchanges.push(exchange);
    if max_exchanges > 0 && session.exchanges.len() > max_exchanges {
        let excess = session.exchanges.len() - max_exchanges;
        session.exchanges.drain(..excess);
        debug!("Session {} trimmed {} oldest exchange(s)", session.key, excess);
    }
    session.exchanges.len()
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(StoreLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::types::ExchangeKind;

    fn exchange(prompt: &str, response: &str) -> Exchange {
        Exchange::new(ExchangeKind::Followup, prompt, response)
    }

    fn unbounded() -> SessionStore {
        SessionStore::new(StoreLimits {
            ttl: Duration::from_secs(3600),
            max_sessions: 0,
            max_exchanges: 0,
        })
    }

    #[test]
    fn test_get_or_create_returns_empty_session_once() {
        let store = unbounded();
        let session = store.get_or_create("s1");
        assert_eq!(session.key, "s1");
        assert!(session.exchanges.is_empty());

        store.append_exchange("s1", exchange("a", "b"));
        let again = store.get_or_create("s1");
        assert_eq!(again.exchanges.len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_append_after_clear_is_skipped_for_stale_generation() {
        let store = unbounded();
        store.append_exchange("s1", exchange("a", "b"));
        let (history, generation) = store.history_snapshot("s1");
        assert_eq!(history.len(), 1);

        store.clear("s1");
        assert_eq!(store.append_exchange_at("s1", exchange("c", "d"), generation), None);
        assert!(store.get_history("s1").is_empty());

        let (_, fresh) = store.history_snapshot("s1");
        assert_eq!(fresh, generation + 1);
        assert_eq!(store.append_exchange_at("s1", exchange("e", "f"), fresh), Some(1));
    }

    #[test]
    fn test_append_at_unknown_key_creates_session() {
        let store = unbounded();
        let (history, generation) = store.history_snapshot("new");
        assert!(history.is_empty());
        assert_eq!(store.append_exchange_at("new", exchange("a", "b"), generation), Some(1));
        assert!(store.contains("new"));
    }

    #[test]
    fn test_clear_is_idempotent() {
        let store = unbounded();
        store.get_or_create("s1");

        assert_eq!(store.clear("s1"), 0);
        assert_eq!(store.clear("s1"), 0);
        assert!(store.get_history("s1").is_empty());

        store.append_exchange("s1", exchange("a", "b"));
        assert_eq!(store.clear("s1"), 1);
        assert_eq!(store.clear("s1"), 0);
        assert!(store.get_history("s1").is_empty());
    }

    #[test]
    fn test_history_preserves_append_order() {
        let store = unbounded();
        for i in 0..10 {
            let len = store.append_exchange("s1", exchange(&format!("p{i}"), &format!("r{i}")));
            assert_eq!(len, i + 1);
        }

        let history = store.get_history("s1");
        let prompts: Vec<&str> = history.iter().map(|e| e.prompt.as_str()).collect();
        let expected: Vec<String> = (0..10).map(|i| format!("p{i}")).collect();
        assert_eq!(prompts, expected);
    }

    #[test]
    fn test_sessions_are_isolated() {
        let store = unbounded();
        store.append_exchange("a", exchange("a1", "ra1"));
        store.append_exchange("b", exchange("b1", "rb1"));
        store.append_exchange("a", exchange("a2", "ra2"));

        assert_eq!(store.get_history("a").len(), 2);
        assert_eq!(store.get_history("b").len(), 1);
        assert_eq!(store.get_history("b")[0].prompt, "b1");

        store.clear("a");
        assert!(store.get_history("a").is_empty());
        assert_eq!(store.get_history("b").len(), 1);
    }

    #[test]
    fn test_unknown_key_behaves_like_empty_session() {
        let store = unbounded();
        assert!(store.get_history("ghost").is_empty());
        assert_eq!(store.clear("ghost"), 0);
        // Reads and clears never create sessions
        assert!(!store.contains("ghost"));
        assert!(store.is_empty());

        store.get_or_create("fresh");
        assert_eq!(store.get_history("fresh"), store.get_history("ghost"));
        assert_eq!(store.clear("fresh"), store.clear("ghost"));
    }

    #[test]
    fn test_concurrent_appends_are_not_lost() {
        let store = unbounded();
        const WRITERS: usize = 16;
        const PER_WRITER: usize = 50;

        std::thread::scope(|scope| {
            for w in 0..WRITERS {
                let store = store.clone();
                scope.spawn(move || {
                    for i in 0..PER_WRITER {
                        store.append_exchange("shared", exchange(&format!("{w}-{i}"), "ok"));
                    }
                });
            }
        });

        let history = store.get_history("shared");
        assert_eq!(history.len(), WRITERS * PER_WRITER);

        // Each writer's own exchanges stay in the order it appended them
        for w in 0..WRITERS {
            let own: Vec<usize> = history
                .iter()
                .filter_map(|e| {
                    let (writer, seq) = e.prompt.split_once('-')?;
                    if writer == w.to_string() {
                        seq.parse().ok()
                    } else {
                        None
                    }
                })
                .collect();
            assert_eq!(own, (0..PER_WRITER).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_max_exchanges_drops_oldest() {
        let store = SessionStore::new(StoreLimits {
            ttl: Duration::from_secs(3600),
            max_sessions: 0,
            max_exchanges: 3,
        });
        for i in 0..5 {
            store.append_exchange("s1", exchange(&format!("p{i}"), "r"));
        }

        let prompts: Vec<String> = store
            .get_history("s1")
            .into_iter()
            .map(|e| e.prompt)
            .collect();
        assert_eq!(prompts, vec!["p2", "p3", "p4"]);
    }

    #[test]
    fn test_max_sessions_evicts_oldest() {
        let store = SessionStore::new(StoreLimits {
            ttl: Duration::from_secs(3600),
            max_sessions: 2,
            max_exchanges: 0,
        });
        store.get_or_create("first");
        std::thread::sleep(Duration::from_millis(2));
        store.get_or_create("second");
        std::thread::sleep(Duration::from_millis(2));
        store.get_or_create("third");

        assert_eq!(store.len(), 2);
        assert!(!store.contains("first"));
        assert!(store.contains("second"));
        assert!(store.contains("third"));
    }

    #[test]
    fn test_expired_sessions_read_as_empty_and_are_swept() {
        let store = SessionStore::new(StoreLimits {
            ttl: Duration::ZERO,
            max_sessions: 0,
            max_exchanges: 0,
        });
        store.append_exchange("old", exchange("a", "b"));
        std::thread::sleep(Duration::from_millis(2));

        assert!(!store.contains("old"));
        assert!(store.get_history("old").is_empty());
        assert!(store.is_empty());

        store.append_exchange("older", exchange("a", "b"));
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(store.cleanup_expired(), 1);
        assert!(store.is_empty());
    }
}
