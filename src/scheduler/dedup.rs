//! At-most-one-concurrent-build-per-fingerprint (spec.md §8: "For all cache
//! keys k, at most one Build task is in flight globally for k at any
//! time"), consulted before the cache tiers are even checked.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use crate::hash::Fingerprint;

#[derive(Default)]
pub struct BuildDedup {
    inflight: Mutex<HashMap<Fingerprint, Arc<Notify>>>,
}

pub enum Claim {
    /// This caller is now the sole builder of `key`; call `release` when
    /// the build (success or failure) is done.
    Leader,
    /// Another caller is already building `key`; await the returned
    /// `Notify` and then re-check whatever state you were waiting on
    /// (cache, target state) rather than building again.
    Follower(Arc<Notify>),
}

impl BuildDedup {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn claim(&self, key: Fingerprint) -> Claim {
        let mut inflight = self.inflight.lock().await;
        if let Some(notify) = inflight.get(&key) {
            return Claim::Follower(Arc::clone(notify));
        }
        inflight.insert(key, Arc::new(Notify::new()));
        Claim::Leader
    }

    pub async fn release(&self, key: Fingerprint) {
        let mut inflight = self.inflight.lock().await;
        if let Some(notify) = inflight.remove(&key) {
            notify.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: u8) -> Fingerprint {
        crate::hash::Hasher::new().put_u8(seed).finalize()
    }

    #[tokio::test]
    async fn first_claimant_leads_second_follows() {
        let dedup = BuildDedup::new();
        assert!(matches!(dedup.claim(key(1)).await, Claim::Leader));
        assert!(matches!(dedup.claim(key(1)).await, Claim::Follower(_)));
    }

    #[tokio::test]
    async fn different_keys_can_both_lead() {
        let dedup = BuildDedup::new();
        assert!(matches!(dedup.claim(key(1)).await, Claim::Leader));
        assert!(matches!(dedup.claim(key(2)).await, Claim::Leader));
    }

    #[tokio::test]
    async fn release_wakes_followers_and_frees_the_key_for_a_new_leader() {
        let dedup = BuildDedup::new();
        assert!(matches!(dedup.claim(key(1)).await, Claim::Leader));
        let Claim::Follower(notify) = dedup.claim(key(1)).await else {
            panic!("expected a follower");
        };

        // Register as a waiter before the leader releases, the same
        // ordering a real follower task would use while the leader's
        // build is still in flight.
        let waiter = notify.notified();
        let released = dedup.release(key(1));
        tokio::join!(waiter, released);

        assert!(matches!(dedup.claim(key(1)).await, Claim::Leader));
    }
}
