//! Revocation State Cache for AgentPin
//!
//! Holds network-fetched revocation documents in memory, keyed by endpoint,
//! for an explicit TTL. A zero TTL disables caching entirely.

use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::discovery::RevocationState;

#[derive(Debug, Clone)]
struct CachedEntry {
    state: RevocationState,
    cached_at: Instant,
}

#[derive(Debug)]
pub struct RevocationCache {
    entries: DashMap<String, CachedEntry>,
    ttl: Duration,
}

impl RevocationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Cached state for `endpoint`, if present and younger than the TTL
    pub fn get(&self, endpoint: &str) -> Option<RevocationState> {
        if !self.is_enabled() {
            return None;
        }

        let entry = self.entries.get(endpoint)?;
        if entry.cached_at.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(endpoint);
            return None;
        }
        Some(entry.state.clone())
    }

    pub fn put(&self, endpoint: &str, state: &RevocationState) {
        if !self.is_enabled() {
            return;
        }
        self.entries.insert(
            endpoint.to_string(),
            CachedEntry {
                state: state.clone(),
                cached_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, endpoint: &str) {
        self.entries.remove(endpoint);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const ENDPOINT: &str = "https://a.example/revocations.json";

    #[test]
    fn test_cache_miss() {
        let cache = RevocationCache::new(Duration::from_secs(60));
        assert!(cache.get(ENDPOINT).is_none());
    }

    #[test]
    fn test_cache_hit() {
        let cache = RevocationCache::new(Duration::from_secs(60));
        let mut state = RevocationState::empty(Utc::now());
        state.revoked_kids.insert("k1".to_string());

        cache.put(ENDPOINT, &state);
        assert_eq!(cache.get(ENDPOINT), Some(state));
    }

    #[test]
    fn test_cache_expiry() {
        let cache = RevocationCache::new(Duration::from_millis(20));
        cache.put(ENDPOINT, &RevocationState::empty(Utc::now()));
        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get(ENDPOINT).is_none());
    }

    #[test]
    fn test_disabled_cache_stores_nothing() {
        let cache = RevocationCache::disabled();
        cache.put(ENDPOINT, &RevocationState::empty(Utc::now()));
        assert!(cache.get(ENDPOINT).is_none());
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache = RevocationCache::new(Duration::from_secs(60));
        cache.put(ENDPOINT, &RevocationState::empty(Utc::now()));
        cache.put("https://b.example/r.json", &RevocationState::empty(Utc::now()));

        cache.invalidate(ENDPOINT);
        assert!(cache.get(ENDPOINT).is_none());
        assert!(cache.get("https://b.example/r.json").is_some());

        cache.clear();
        assert!(cache.get("https://b.example/r.json").is_none());
    }
}
