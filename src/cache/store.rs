//! Per-key snapshot store with replay-latest fan-out.
//!
//! The store is the only place snapshots are accepted. Each key keeps its last accepted
//! snapshot plus a broadcast channel; a new stream first yields the stored value and then
//! every later accepted snapshot, so subscribers never wait for the next event to see state.

use crate::key::AccountKey;
use crate::rpc::AccountSnapshot;
use futures::stream::{self, Stream, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::pin::Pin;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, trace};

/// Stream of accepted snapshots for one key.
pub type SnapshotStream = Pin<Box<dyn Stream<Item = AccountSnapshot> + Send>>;

/// Outcome of offering a snapshot to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted,
    /// Slot was zero or unknown.
    MissingSlot,
    /// Slot was not newer than the stored snapshot.
    Stale { stored_slot: u64 },
}

struct Entry {
    latest: Option<AccountSnapshot>,
    /// Set once a lookup or notification has produced a value for the key.
    resolved: bool,
    sender: broadcast::Sender<AccountSnapshot>,
}

impl Entry {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            latest: None,
            resolved: false,
            sender,
        }
    }
}

/// Latest-known snapshot per key.
pub struct AccountStore {
    entries: Mutex<HashMap<AccountKey, Entry>>,
    capacity: usize,
}

impl AccountStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Offer a snapshot. Accepted snapshots replace the stored value and are broadcast to
    /// every open stream for the key, in call order.
    pub fn ingest(&self, snapshot: AccountSnapshot) -> IngestOutcome {
        if snapshot.slot == 0 {
            trace!("Dropping snapshot for {} without slot", snapshot.key.short());
            return IngestOutcome::MissingSlot;
        }

        let mut entries = self.entries.lock();
        let entry = entries
            .entry(snapshot.key)
            .or_insert_with(|| Entry::new(self.capacity));

        if let Some(stored) = &entry.latest {
            if snapshot.slot <= stored.slot {
                trace!(
                    "Dropping stale snapshot for {} (slot {} <= {})",
                    snapshot.key.short(),
                    snapshot.slot,
                    stored.slot
                );
                return IngestOutcome::Stale {
                    stored_slot: stored.slot,
                };
            }
        }

        debug!(
            "Accepted snapshot for {} at slot {} from {}",
            snapshot.key.short(),
            snapshot.slot,
            snapshot.source_endpoint
        );
        entry.resolved = true;
        entry.latest = Some(snapshot.clone());
        // No receivers is fine; the value is still stored for later replay.
        let _ = entry.sender.send(snapshot);
        IngestOutcome::Accepted
    }

    /// Stream yielding the stored snapshot (if any) followed by every later accepted one.
    ///
    /// The replay value and the live receiver are taken under the same lock, so no accepted
    /// snapshot can fall between them.
    pub fn stream(&self, key: AccountKey) -> SnapshotStream {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(key)
            .or_insert_with(|| Entry::new(self.capacity));
        let replay = entry.latest.clone();
        let receiver = entry.sender.subscribe();
        drop(entries);

        let live = BroadcastStream::new(receiver).filter_map(move |item| async move {
            match item {
                Ok(snapshot) => Some(snapshot),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    debug!("Stream for {} lagged, skipped {} snapshots", key.short(), skipped);
                    None
                }
            }
        });
        Box::pin(stream::iter(replay).chain(live))
    }

    pub fn latest(&self, key: &AccountKey) -> Option<AccountSnapshot> {
        self.entries
            .lock()
            .get(key)
            .and_then(|entry| entry.latest.clone())
    }

    pub fn is_resolved(&self, key: &AccountKey) -> bool {
        self.entries
            .lock()
            .get(key)
            .is_some_and(|entry| entry.resolved)
    }

    /// Mark a key resolved without storing a value, e.g. after a lookup whose snapshot
    /// was rejected as stale.
    pub fn mark_resolved(&self, key: AccountKey) {
        self.entries
            .lock()
            .entry(key)
            .or_insert_with(|| Entry::new(self.capacity))
            .resolved = true;
    }

    /// Every key the store has seen, resolved or not.
    pub fn keys(&self) -> Vec<AccountKey> {
        self.entries.lock().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::mock::snapshot;
    use futures::FutureExt;

    fn key() -> AccountKey {
        AccountKey::new([1; 32])
    }

    /// Drain whatever is ready on the stream without waiting.
    fn ready(stream: &mut SnapshotStream) -> Vec<AccountSnapshot> {
        let mut out = Vec::new();
        while let Some(Some(item)) = stream.next().now_or_never() {
            out.push(item);
        }
        out
    }

    #[test]
    fn test_slot_ordering_scenario() {
        let store = AccountStore::new(16);
        let mut updates = store.stream(key());

        let outcomes: Vec<_> = [(5, 0xa), (3, 0xb), (9, 0xc), (9, 0xd)]
            .into_iter()
            .map(|(slot, tag)| store.ingest(snapshot(key(), slot, &[tag])))
            .collect();

        assert_eq!(
            outcomes,
            vec![
                IngestOutcome::Accepted,
                IngestOutcome::Stale { stored_slot: 5 },
                IngestOutcome::Accepted,
                IngestOutcome::Stale { stored_slot: 9 },
            ]
        );

        let seen = ready(&mut updates);
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].slot, 5);
        assert_eq!(seen[1].slot, 9);

        let stored = store.latest(&key()).expect("Key should be stored");
        assert_eq!(stored.slot, 9);
        assert_eq!(stored.raw_data, Some(vec![0xc]));
    }

    #[test]
    fn test_zero_slot_discarded() {
        let store = AccountStore::new(16);
        assert_eq!(
            store.ingest(snapshot(key(), 0, &[1])),
            IngestOutcome::MissingSlot
        );
        assert!(store.latest(&key()).is_none());
        assert!(!store.is_resolved(&key()));
    }

    #[test]
    fn test_new_stream_replays_latest() {
        let store = AccountStore::new(16);
        store.ingest(snapshot(key(), 7, &[1]));
        store.ingest(snapshot(key(), 8, &[2]));

        let mut late = store.stream(key());
        let seen = ready(&mut late);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].slot, 8);

        store.ingest(snapshot(key(), 10, &[3]));
        let seen = ready(&mut late);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].slot, 10);
    }

    #[test]
    fn test_lagging_stream_skips_ahead() {
        let store = AccountStore::new(2);
        let mut updates = store.stream(key());
        for slot in 1..=5 {
            store.ingest(snapshot(key(), slot, &[slot as u8]));
        }
        let slots: Vec<u64> = ready(&mut updates).iter().map(|s| s.slot).collect();
        assert_eq!(slots, vec![4, 5]);
    }

    #[test]
    fn test_absent_snapshot_marks_resolved() {
        let store = AccountStore::new(16);
        let absent = AccountSnapshot::absent(key(), 12, "mock");
        assert_eq!(store.ingest(absent), IngestOutcome::Accepted);
        assert!(store.is_resolved(&key()));
        assert!(!store.latest(&key()).expect("Key should be stored").exists());
    }
}
