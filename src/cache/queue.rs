//! Work queues feeding the cache's background tasks.

use crate::key::AccountKey;
use std::collections::{HashMap, HashSet, VecDeque};

/// Keys waiting for batched resolution.
///
/// Each queued key carries a force flag. Forced entries are resolved even if the key already
/// has a value; unforced entries are skipped once the key is resolved. Enqueuing a key that is
/// already queued keeps its position and ORs the flags, so a poll never loses its force bit to
/// an earlier plain request.
#[derive(Debug, Default)]
pub struct ResolveQueue {
    order: VecDeque<AccountKey>,
    queued: HashMap<AccountKey, bool>,
}

impl ResolveQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the key was newly queued.
    pub fn enqueue(&mut self, key: AccountKey, force: bool) -> bool {
        match self.queued.get_mut(&key) {
            Some(existing) => {
                *existing |= force;
                false
            }
            None => {
                self.queued.insert(key, force);
                self.order.push_back(key);
                true
            }
        }
    }

    /// Pop up to `max` keys in FIFO order. Unforced keys for which `is_resolved` holds are
    /// dropped from the queue without counting toward `max`.
    pub fn take_batch(
        &mut self,
        max: usize,
        is_resolved: impl Fn(&AccountKey) -> bool,
    ) -> Vec<AccountKey> {
        let mut batch = Vec::new();
        while batch.len() < max {
            let Some(key) = self.order.pop_front() else {
                break;
            };
            let force = self.queued.remove(&key).unwrap_or(false);
            if force || !is_resolved(&key) {
                batch.push(key);
            }
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// A live subscription target: one key on one endpoint.
pub type SubscriptionPair = (AccountKey, String);

/// Pending and registered live subscriptions.
///
/// A pair is accepted once while pending or registered; later requests for it are no-ops.
/// A failed registration forgets the pair so the next request retries it.
#[derive(Debug, Default)]
pub struct SubscriptionQueue {
    pending: VecDeque<SubscriptionPair>,
    pending_set: HashSet<SubscriptionPair>,
    registered: HashSet<SubscriptionPair>,
}

impl SubscriptionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the pair was newly queued.
    pub fn request(&mut self, key: AccountKey, endpoint: &str) -> bool {
        let pair = (key, endpoint.to_string());
        if self.registered.contains(&pair) || self.pending_set.contains(&pair) {
            return false;
        }
        self.pending_set.insert(pair.clone());
        self.pending.push_back(pair);
        true
    }

    /// Oldest pending pair. It stays in the pending set until completed or failed.
    pub fn next(&mut self) -> Option<SubscriptionPair> {
        self.pending.pop_front()
    }

    pub fn complete(&mut self, pair: SubscriptionPair) {
        self.pending_set.remove(&pair);
        self.registered.insert(pair);
    }

    pub fn fail(&mut self, pair: &SubscriptionPair) {
        self.pending_set.remove(pair);
    }

    /// Put an in-flight pair back at the head of the queue, for registrations that were
    /// interrupted before completing or failing.
    pub fn retry(&mut self, pair: SubscriptionPair) {
        if self.pending_set.contains(&pair) && !self.pending.contains(&pair) {
            self.pending.push_front(pair);
        }
    }

    /// Drop a registered pair so it can be requested again.
    pub fn forget(&mut self, pair: &SubscriptionPair) {
        self.registered.remove(pair);
    }

    pub fn is_registered(&self, key: &AccountKey, endpoint: &str) -> bool {
        self.registered.contains(&(*key, endpoint.to_string()))
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: u8) -> AccountKey {
        AccountKey::new([seed; 32])
    }

    #[test]
    fn test_resolve_queue_dedupes_and_keeps_force() {
        let mut queue = ResolveQueue::new();
        assert!(queue.enqueue(key(1), false));
        assert!(queue.enqueue(key(2), false));
        assert!(!queue.enqueue(key(1), true));
        assert_eq!(queue.len(), 2);

        // Both keys already resolved; only the forced one comes out.
        let batch = queue.take_batch(10, |_| true);
        assert_eq!(batch, vec![key(1)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_resolve_queue_batch_ceiling() {
        let mut queue = ResolveQueue::new();
        for seed in 0..5 {
            queue.enqueue(key(seed), false);
        }
        assert_eq!(queue.take_batch(3, |_| false), vec![key(0), key(1), key(2)]);
        assert_eq!(queue.take_batch(3, |_| false), vec![key(3), key(4)]);
    }

    #[test]
    fn test_resolved_keys_do_not_use_batch_slots() {
        let mut queue = ResolveQueue::new();
        for seed in 0..4 {
            queue.enqueue(key(seed), false);
        }
        let batch = queue.take_batch(2, |k| *k == key(0) || *k == key(1));
        assert_eq!(batch, vec![key(2), key(3)]);
    }

    #[test]
    fn test_subscription_pair_registered_once() {
        let mut queue = SubscriptionQueue::new();
        assert!(queue.request(key(1), "a"));
        assert!(!queue.request(key(1), "a"));
        assert!(queue.request(key(1), "b"));

        let pair = queue.next().expect("Pair should be pending");
        // Still in flight
        assert!(!queue.request(key(1), "a"));
        queue.complete(pair);
        assert!(queue.is_registered(&key(1), "a"));
        assert!(!queue.request(key(1), "a"));
    }

    #[test]
    fn test_failed_subscription_retried() {
        let mut queue = SubscriptionQueue::new();
        queue.request(key(1), "a");
        let pair = queue.next().expect("Pair should be pending");
        queue.fail(&pair);
        assert!(!queue.is_registered(&key(1), "a"));
        assert!(queue.request(key(1), "a"));
        assert_eq!(queue.pending_len(), 1);
    }

    #[test]
    fn test_interrupted_subscription_goes_back_first() {
        let mut queue = SubscriptionQueue::new();
        queue.request(key(1), "a");
        queue.request(key(2), "a");
        let pair = queue.next().expect("Pair should be pending");

        queue.retry(pair.clone());
        queue.retry(pair.clone());
        assert_eq!(queue.pending_len(), 2);
        assert!(!queue.request(key(1), "a"));
        assert_eq!(queue.next(), Some(pair));

        // Completed pairs are not re-queued.
        let done = queue.next().expect("Pair should be pending");
        queue.complete(done.clone());
        queue.retry(done);
        assert_eq!(queue.pending_len(), 0);
    }
}
