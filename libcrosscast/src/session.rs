//! Cached Bluesky sessions.
//!
//! Logging in for every call would hammer the PDS, so sessions are reused
//! per account id. The cache is bounded and TTL-evicted; the original
//! unbounded process-wide map is exactly what this replaces.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// An authenticated XRPC session.
#[derive(Debug, Clone)]
pub struct BlueskySession {
    pub did: String,
    pub handle: String,
    pub access_jwt: String,
}

struct CacheEntry {
    session: BlueskySession,
    created_at: Instant,
}

pub struct SessionCache {
    capacity: usize,
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl SessionCache {
    pub fn from_config(config: &crate::config::SessionConfig) -> Self {
        Self::new(config.capacity, Duration::from_secs(config.ttl_secs))
    }

    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch a live session for an account. Expired entries are dropped on
    /// access and `None` is returned so the caller performs a fresh login.
    pub fn get(&self, account_id: &str) -> Option<BlueskySession> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(account_id) {
            Some(entry) if entry.created_at.elapsed() < self.ttl => Some(entry.session.clone()),
            Some(_) => {
                entries.remove(account_id);
                None
            }
            None => None,
        }
    }

    /// Cache a freshly created session. When full, the oldest entry is
    /// evicted first.
    pub fn insert(&self, account_id: &str, session: BlueskySession) {
        let mut entries = self.entries.lock().unwrap();

        if !entries.contains_key(account_id) && entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.created_at)
                .map(|(id, _)| id.clone());
            if let Some(id) = oldest {
                entries.remove(&id);
            }
        }

        entries.insert(
            account_id.to_string(),
            CacheEntry {
                session,
                created_at: Instant::now(),
            },
        );
    }

    /// Drop an account's session, e.g. after the PDS rejects its token.
    pub fn invalidate(&self, account_id: &str) {
        self.entries.lock().unwrap().remove(account_id);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(did: &str) -> BlueskySession {
        BlueskySession {
            did: did.to_string(),
            handle: format!("{}.bsky.social", did),
            access_jwt: format!("jwt-{}", did),
        }
    }

    #[test]
    fn test_get_returns_cached_session() {
        let cache = SessionCache::new(4, Duration::from_secs(60));
        cache.insert("acct-1", session("did:plc:one"));

        let cached = cache.get("acct-1").expect("session should be cached");
        assert_eq!(cached.did, "did:plc:one");
    }

    #[test]
    fn test_get_unknown_account_is_none() {
        let cache = SessionCache::new(4, Duration::from_secs(60));
        assert!(cache.get("nobody").is_none());
    }

    #[test]
    fn test_expired_sessions_are_evicted_on_access() {
        let cache = SessionCache::new(4, Duration::from_millis(20));
        cache.insert("acct-1", session("did:plc:one"));

        std::thread::sleep(Duration::from_millis(40));

        assert!(cache.get("acct-1").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = SessionCache::new(2, Duration::from_secs(60));
        cache.insert("acct-1", session("did:plc:one"));
        std::thread::sleep(Duration::from_millis(5));
        cache.insert("acct-2", session("did:plc:two"));
        std::thread::sleep(Duration::from_millis(5));
        cache.insert("acct-3", session("did:plc:three"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("acct-1").is_none(), "oldest entry should be evicted");
        assert!(cache.get("acct-2").is_some());
        assert!(cache.get("acct-3").is_some());
    }

    #[test]
    fn test_reinsert_replaces_without_eviction() {
        let cache = SessionCache::new(2, Duration::from_secs(60));
        cache.insert("acct-1", session("did:plc:one"));
        cache.insert("acct-2", session("did:plc:two"));
        cache.insert("acct-1", session("did:plc:updated"));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("acct-1").unwrap().did, "did:plc:updated");
        assert!(cache.get("acct-2").is_some());
    }

    #[test]
    fn test_from_config_defaults() {
        let cache = SessionCache::from_config(&crate::config::SessionConfig::default());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_removes_entry() {
        let cache = SessionCache::new(4, Duration::from_secs(60));
        cache.insert("acct-1", session("did:plc:one"));
        cache.invalidate("acct-1");
        assert!(cache.get("acct-1").is_none());
    }
}
