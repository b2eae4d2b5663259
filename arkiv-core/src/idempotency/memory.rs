use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::ClaimStore;
use crate::error::ArchiveError;

/// Bounded in-process TTL set with lazy eviction on write.
///
/// A zero TTL disables the set: every `try_claim` succeeds. Expired keys
/// are purged periodically so mostly-unique keys don't grow the map
/// forever.
#[derive(Debug)]
pub struct InMemoryTtlSet {
    ttl: Duration,
    state: Mutex<State>,
}

#[derive(Debug)]
struct State {
    expires_at_by_key: HashMap<String, Instant>,
    next_evict_at: Instant,
}

impl InMemoryTtlSet {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Mutex::new(State {
                expires_at_by_key: HashMap::new(),
                next_evict_at: Instant::now(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().expires_at_by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn maybe_evict(&self, state: &mut State, now: Instant) {
        if now < state.next_evict_at {
            return;
        }
        state.expires_at_by_key.retain(|_, expires| *expires > now);
        let interval = self.ttl.clamp(Duration::from_secs(1), Duration::from_secs(60));
        state.next_evict_at = now + interval;
    }

    fn try_claim_sync(&self, key: &str) -> bool {
        if self.ttl.is_zero() {
            return true;
        }
        let now = Instant::now();
        let mut state = self.state.lock();
        self.maybe_evict(&mut state, now);

        match state.expires_at_by_key.get(key) {
            Some(expires) if *expires > now => false,
            _ => {
                state
                    .expires_at_by_key
                    .insert(key.to_string(), now + self.ttl);
                true
            }
        }
    }
}

#[async_trait]
impl ClaimStore for InMemoryTtlSet {
    async fn try_claim(&self, key: &str) -> Result<bool, ArchiveError> {
        Ok(self.try_claim_sync(key))
    }

    async fn release(&self, key: &str) -> Result<(), ArchiveError> {
        self.state.lock().expires_at_by_key.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_claim_wins_within_ttl() {
        let set = InMemoryTtlSet::new(Duration::from_secs(60));
        assert!(set.try_claim("d-1").await.unwrap());
        assert!(!set.try_claim("d-1").await.unwrap());
        assert!(set.try_claim("d-2").await.unwrap());
    }

    #[tokio::test]
    async fn release_frees_the_key() {
        let set = InMemoryTtlSet::new(Duration::from_secs(60));
        assert!(set.try_claim("t-1").await.unwrap());
        set.release("t-1").await.unwrap();
        assert!(set.try_claim("t-1").await.unwrap());
    }

    #[tokio::test]
    async fn zero_ttl_disables_dedup() {
        let set = InMemoryTtlSet::new(Duration::ZERO);
        assert!(set.try_claim("d-1").await.unwrap());
        assert!(set.try_claim("d-1").await.unwrap());
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn expired_claims_can_be_retaken() {
        let set = InMemoryTtlSet::new(Duration::from_millis(10));
        assert!(set.try_claim("d-1").await.unwrap());
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(set.try_claim("d-1").await.unwrap());
    }
}
