//! Per-ticket mutual exclusion.
//!
//! The in-process in-flight set is always acquired first (intra-process
//! ordering); the distributed claim, when configured, is attempted under
//! it. If Redis is unreachable the guard degrades to the in-process lock
//! alone and logs a warning, which keeps a single node safe.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashSet;
use tracing::warn;

use crate::idempotency::SharedClaimStore;

/// Safety-net TTL for the distributed ticket lock.
pub const TICKET_LOCK_TTL_SECONDS: u64 = 300;
pub const TICKET_LOCK_PREFIX: &str = "arkiv:ticket_lock:";

pub struct TicketGuard {
    in_flight: DashSet<u64>,
    distributed: Option<SharedClaimStore>,
    shutting_down: Arc<AtomicBool>,
}

impl std::fmt::Debug for TicketGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketGuard")
            .field("in_flight", &self.in_flight.len())
            .field("distributed", &self.distributed.is_some())
            .finish()
    }
}

impl TicketGuard {
    pub fn new(distributed: Option<SharedClaimStore>, shutting_down: Arc<AtomicBool>) -> Self {
        Self {
            in_flight: DashSet::new(),
            distributed,
            shutting_down,
        }
    }

    /// Attempt to take exclusive ownership of a ticket. Returns false when
    /// the ticket is already in flight anywhere, or when shutdown began.
    pub async fn try_acquire(&self, ticket_id: u64) -> bool {
        if self.shutting_down.load(Ordering::SeqCst) {
            return false;
        }

        if !self.in_flight.insert(ticket_id) {
            return false;
        }

        if let Some(store) = &self.distributed {
            match store.try_claim(&ticket_id.to_string()).await {
                Ok(true) => {}
                Ok(false) => {
                    self.in_flight.remove(&ticket_id);
                    return false;
                }
                Err(err) => {
                    warn!(ticket_id, error = %err, "distributed ticket lock unavailable, falling back to local lock");
                }
            }
        }

        true
    }

    /// Release both layers. Never fails; Redis trouble is logged and the
    /// TTL acts as the safety net.
    pub async fn release(&self, ticket_id: u64) {
        if let Some(store) = &self.distributed
            && let Err(err) = store.release(&ticket_id.to_string()).await
        {
            warn!(ticket_id, error = %err, "failed to release distributed ticket lock");
        }
        self.in_flight.remove(&ticket_id);
    }

    pub fn is_in_flight(&self, ticket_id: u64) -> bool {
        self.in_flight.contains(&ticket_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::idempotency::InMemoryTtlSet;

    fn guard(distributed: bool) -> TicketGuard {
        let store: Option<SharedClaimStore> = distributed
            .then(|| Arc::new(InMemoryTtlSet::new(Duration::from_secs(300))) as SharedClaimStore);
        TicketGuard::new(store, Arc::new(AtomicBool::new(false)))
    }

    #[tokio::test]
    async fn second_acquire_fails_until_release() {
        let guard = guard(false);
        assert!(guard.try_acquire(123).await);
        assert!(!guard.try_acquire(123).await);
        assert!(guard.is_in_flight(123));

        guard.release(123).await;
        assert!(!guard.is_in_flight(123));
        assert!(guard.try_acquire(123).await);
    }

    #[tokio::test]
    async fn distributed_conflict_releases_local_lock() {
        let store: SharedClaimStore = Arc::new(InMemoryTtlSet::new(Duration::from_secs(300)));
        // Another node already holds the ticket.
        assert!(store.try_claim("123").await.unwrap());

        let guard = TicketGuard::new(Some(store), Arc::new(AtomicBool::new(false)));
        assert!(!guard.try_acquire(123).await);
        assert!(!guard.is_in_flight(123));
    }

    #[tokio::test]
    async fn shutdown_gates_new_acquisitions() {
        let flag = Arc::new(AtomicBool::new(false));
        let guard = TicketGuard::new(None, flag.clone());
        assert!(guard.try_acquire(1).await);
        flag.store(true, Ordering::SeqCst);
        assert!(!guard.try_acquire(2).await);
    }

    #[tokio::test]
    async fn release_covers_distributed_layer() {
        let guard = guard(true);
        assert!(guard.try_acquire(7).await);
        guard.release(7).await;
        assert!(guard.try_acquire(7).await);
    }
}
