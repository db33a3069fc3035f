//! Account state cache service.
//!
//! This module defines the `AccountStateCache`, which serves a continuously updated view of
//! ledger accounts while keeping remote traffic low. Callers register interest through
//! [`AccountStateCache::stream_for`]; the cache then lazily:
//! - queues the key for one batched lookup on the resolve task
//! - queues one live subscription per (key, endpoint) pair on the throttled subscribe task
//! - optionally starts a poll task that forces periodic re-resolution
//!
//! [`AccountStateCache::logs_for`] multiplexes transaction log subscriptions the same way: one
//! subscription per (filter, endpoint) pair, replaying the latest notification to new streams.
//!
//! Every producer (subscription listeners, resolve task) pushes snapshots into one ingest
//! channel. A single ingest task drains it into the [`AccountStore`], which enforces slot
//! ordering and fans accepted snapshots out to the streams.

use crate::cache::logs::{LogStore, LogStream};
use crate::cache::queue::{ResolveQueue, SubscriptionPair, SubscriptionQueue};
use crate::cache::store::{AccountStore, IngestOutcome, SnapshotStream};
use crate::config::CacheConfig;
use crate::key::AccountKey;
use crate::rpc::{AccountSnapshot, LedgerClient, LogsFilter, SubscriptionHandle};
use futures::stream::{self, Stream, StreamExt};
use itertools::Itertools;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Stream of keyed snapshot maps produced by [`AccountStateCache::stream_for_many`].
pub type SnapshotMapStream =
    Pin<Box<dyn Stream<Item = HashMap<AccountKey, AccountSnapshot>> + Send>>;

/// Per-call options for [`AccountStateCache::stream_for`].
#[derive(Clone)]
pub struct StreamOptions {
    /// Endpoint for the live subscription. Defaults to the cache's own client.
    pub endpoint: Option<Arc<dyn LedgerClient>>,
    pub auto_subscribe: bool,
    /// Queue a one-shot lookup if the key has never been resolved.
    pub fetch_initial: bool,
    /// Force a re-resolution on this interval, independent of the subscription.
    pub poll_interval: Option<Duration>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            endpoint: None,
            auto_subscribe: true,
            fetch_initial: true,
            poll_interval: None,
        }
    }
}

impl StreamOptions {
    pub fn with_endpoint(mut self, endpoint: Arc<dyn LedgerClient>) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval).filter(|i| !i.is_zero());
        self
    }

    pub fn passive() -> Self {
        Self {
            auto_subscribe: false,
            fetch_initial: false,
            ..Self::default()
        }
    }
}

struct Inner {
    client: Arc<dyn LedgerClient>,
    config: CacheConfig,
    store: AccountStore,
    resolve_queue: Mutex<ResolveQueue>,
    subscriptions: Mutex<SubscriptionQueue>,
    /// Clients known by endpoint identity, for the subscribe task.
    endpoints: Mutex<HashMap<String, Arc<dyn LedgerClient>>>,
    handles: Mutex<HashMap<SubscriptionPair, SubscriptionHandle>>,
    /// Registered polls; the handle is present while the cache is running.
    polls: Mutex<HashMap<(AccountKey, Duration), Option<JoinHandle<()>>>>,
    logs: LogStore,
    /// Requested log subscriptions per (filter, endpoint); the task is spawned once running.
    log_subscriptions: Mutex<HashMap<(LogsFilter, String), LogSubscription>>,
    ingest_tx: UnboundedSender<AccountSnapshot>,
    ingest_rx: Mutex<Option<UnboundedReceiver<AccountSnapshot>>>,
    ingest_task: Mutex<Option<JoinHandle<()>>>,
    loops: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

/// Cache of the latest known state per account key.
pub struct AccountStateCache {
    inner: Arc<Inner>,
}

impl AccountStateCache {
    /// Create a cache resolving and subscribing through `client`. Background tasks do not
    /// run until [`AccountStateCache::start`] is called.
    pub fn new(client: Arc<dyn LedgerClient>, config: CacheConfig) -> Self {
        let (ingest_tx, ingest_rx) = mpsc::unbounded_channel();
        let mut endpoints = HashMap::new();
        endpoints.insert(client.endpoint().to_string(), client.clone());

        Self {
            inner: Arc::new(Inner {
                store: AccountStore::new(config.stream_capacity),
                logs: LogStore::new(config.stream_capacity),
                log_subscriptions: Mutex::new(HashMap::new()),
                client,
                config,
                resolve_queue: Mutex::new(ResolveQueue::new()),
                subscriptions: Mutex::new(SubscriptionQueue::new()),
                endpoints: Mutex::new(endpoints),
                handles: Mutex::new(HashMap::new()),
                polls: Mutex::new(HashMap::new()),
                ingest_tx,
                ingest_rx: Mutex::new(Some(ingest_rx)),
                ingest_task: Mutex::new(None),
                loops: Mutex::new(Vec::new()),
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Start the ingest, resolve, subscribe and poll tasks. Calling it on a running cache
    /// is a no-op.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(receiver) = self.inner.ingest_rx.lock().take() {
            let inner = self.inner.clone();
            *self.inner.ingest_task.lock() = Some(tokio::spawn(ingest_loop(inner, receiver)));
        }

        let mut loops = self.inner.loops.lock();
        loops.push(tokio::spawn(resolve_loop(self.inner.clone())));
        loops.push(tokio::spawn(subscribe_loop(self.inner.clone())));
        drop(loops);

        for subscription in self.inner.log_subscriptions.lock().values_mut() {
            if subscription.task.is_none() {
                subscription.task = Some(tokio::spawn(log_subscription(
                    self.inner.clone(),
                    subscription.client.clone(),
                    subscription.filter,
                )));
            }
        }

        let mut polls = self.inner.polls.lock();
        for ((key, interval), handle) in polls.iter_mut() {
            *handle = Some(tokio::spawn(poll_loop(self.inner.clone(), *key, *interval)));
        }
        info!(
            "Account cache started ({} polls, {} known keys)",
            polls.len(),
            self.inner.store.len()
        );
    }

    /// Pause the resolve, subscribe and poll tasks. Stored snapshots, queues and live
    /// subscriptions (account and logs) are kept; [`AccountStateCache::start`] resumes from
    /// there. A registration interrupted mid-call is queued again.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for task in self.inner.loops.lock().drain(..) {
            task.abort();
        }
        for handle in self.inner.polls.lock().values_mut() {
            if let Some(task) = handle.take() {
                task.abort();
            }
        }
        info!("Account cache stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Continuously updated snapshots for `key`.
    ///
    /// The stream yields the latest stored snapshot immediately when one exists, then every
    /// accepted update. Registering interest queues at most one live subscription per
    /// (key, endpoint) pair and, unless the key is already resolved, one batched lookup.
    pub fn stream_for(&self, key: AccountKey, options: StreamOptions) -> SnapshotStream {
        // Take the receiver first so a snapshot resolved right after is not missed.
        let stream = self.inner.store.stream(key);
        let inner = &self.inner;

        if options.auto_subscribe {
            let endpoint = options.endpoint.unwrap_or_else(|| inner.client.clone());
            let identity = endpoint.endpoint().to_string();
            inner
                .endpoints
                .lock()
                .entry(identity.clone())
                .or_insert(endpoint);
            if inner.subscriptions.lock().request(key, &identity) {
                debug!("Queued subscription for {} on {}", key.short(), identity);
            }
        }

        if options.fetch_initial && !inner.store.is_resolved(&key) {
            inner.resolve_queue.lock().enqueue(key, false);
        }

        if let Some(interval) = options.poll_interval.filter(|i| !i.is_zero()) {
            self.register_poll(key, interval);
        }

        stream
    }

    /// Combined view over several keys.
    ///
    /// Emits the full map of latest snapshots whenever any key updates, but only once every
    /// key has produced at least one snapshot. Duplicate keys are collapsed.
    pub fn stream_for_many(&self, keys: &[AccountKey], options: StreamOptions) -> SnapshotMapStream {
        let keys: Vec<AccountKey> = keys.iter().copied().unique().collect();
        let expected = keys.len();
        let streams: Vec<SnapshotStream> = keys
            .into_iter()
            .map(|key| self.stream_for(key, options.clone()))
            .collect();

        let merged = stream::select_all(streams).scan(
            HashMap::with_capacity(expected),
            move |latest: &mut HashMap<AccountKey, AccountSnapshot>, snapshot| {
                latest.insert(snapshot.key, snapshot);
                let emit = (latest.len() == expected).then(|| latest.clone());
                futures::future::ready(Some(emit))
            },
        );
        Box::pin(merged.filter_map(futures::future::ready))
    }

    /// Latest stored snapshot, without registering interest.
    pub fn latest(&self, key: &AccountKey) -> Option<AccountSnapshot> {
        self.inner.store.latest(key)
    }

    /// Transaction logs matching `filter`, starting with the latest notification seen.
    ///
    /// The first request for a (filter, endpoint) pair registers one logs subscription on
    /// `endpoint` (the cache's client when `None`); later requests share it. A failed or
    /// ended subscription is registered again on the next request.
    pub fn logs_for(
        &self,
        filter: LogsFilter,
        endpoint: Option<Arc<dyn LedgerClient>>,
    ) -> LogStream {
        let stream = self.inner.logs.stream(filter);
        let client = endpoint.unwrap_or_else(|| self.inner.client.clone());
        let identity = client.endpoint().to_string();

        let mut subscriptions = self.inner.log_subscriptions.lock();
        if !subscriptions.contains_key(&(filter, identity.clone())) {
            let task = self.is_running().then(|| {
                tokio::spawn(log_subscription(self.inner.clone(), client.clone(), filter))
            });
            debug!("Requested {} logs on {}", filter, identity);
            subscriptions.insert(
                (filter, identity),
                LogSubscription {
                    filter,
                    client,
                    task,
                },
            );
        }
        stream
    }

    /// Re-register a live subscription on the default endpoint for every known key.
    /// Existing subscriptions on that endpoint are cancelled first.
    pub fn resubscribe_all(&self) -> usize {
        let identity = self.inner.client.endpoint().to_string();
        let keys = self.inner.store.keys();
        let mut subscriptions = self.inner.subscriptions.lock();
        let mut handles = self.inner.handles.lock();
        let mut queued = 0;
        for key in keys {
            let pair = (key, identity.clone());
            if let Some(handle) = handles.remove(&pair) {
                handle.cancel();
            }
            subscriptions.forget(&pair);
            if subscriptions.request(key, &identity) {
                queued += 1;
            }
        }
        info!("Re-queued {} subscriptions on {}", queued, identity);
        queued
    }

    fn register_poll(&self, key: AccountKey, interval: Duration) {
        let mut polls = self.inner.polls.lock();
        if polls.contains_key(&(key, interval)) {
            return;
        }
        let handle = self
            .is_running()
            .then(|| tokio::spawn(poll_loop(self.inner.clone(), key, interval)));
        polls.insert((key, interval), handle);
        debug!("Polling {} every {:?}", key.short(), interval);
    }
}

impl Drop for AccountStateCache {
    fn drop(&mut self) {
        self.stop();
        if let Some(task) = self.inner.ingest_task.lock().take() {
            task.abort();
        }
        for (_, handle) in self.inner.handles.lock().drain() {
            handle.cancel();
        }
        for (_, subscription) in self.inner.log_subscriptions.lock().drain() {
            if let Some(task) = subscription.task {
                task.abort();
            }
        }
    }
}

struct LogSubscription {
    filter: LogsFilter,
    client: Arc<dyn LedgerClient>,
    task: Option<JoinHandle<()>>,
}

/// Register one logs subscription and forward its notifications into the log store until
/// the subscription ends.
async fn log_subscription(inner: Arc<Inner>, client: Arc<dyn LedgerClient>, filter: LogsFilter) {
    let identity = client.endpoint().to_string();
    let (sink, mut notifications) = mpsc::unbounded_channel();
    let handle = match client.subscribe_logs(filter, sink).await {
        Ok(handle) => handle,
        Err(e) => {
            warn!("Failed to subscribe to {} logs on {}: {}", filter, identity, e);
            inner.log_subscriptions.lock().remove(&(filter, identity));
            return;
        }
    };
    info!("Subscribed to {} logs on {} (id {})", filter, identity, handle.id);

    while let Some(notification) = notifications.recv().await {
        inner.logs.publish(notification);
    }
    debug!("Logs subscription {} on {} ended", filter, identity);
    inner.log_subscriptions.lock().remove(&(filter, identity));
}

async fn ingest_loop(inner: Arc<Inner>, mut receiver: UnboundedReceiver<AccountSnapshot>) {
    while let Some(snapshot) = receiver.recv().await {
        let key = snapshot.key;
        match inner.store.ingest(snapshot) {
            IngestOutcome::Accepted => {}
            IngestOutcome::Stale { stored_slot } => {
                debug!("Ignored update for {} older than slot {}", key.short(), stored_slot);
            }
            IngestOutcome::MissingSlot => {
                debug!("Ignored update for {} without slot", key.short());
            }
        }
    }
}

async fn resolve_loop(inner: Arc<Inner>) {
    let mut ticker = tokio::time::interval(inner.config.resolve_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let batch = inner
            .resolve_queue
            .lock()
            .take_batch(inner.config.resolve_batch_size, |key| {
                inner.store.is_resolved(key)
            });
        if batch.is_empty() {
            continue;
        }

        debug!("Resolving {} accounts", batch.len());
        match inner.client.get_multiple_accounts(&batch).await {
            Ok(mut snapshots) => {
                let context_slot = snapshots.values().map(|s| s.slot).filter(|s| *s > 0).max();
                for key in &batch {
                    let snapshot = match (snapshots.remove(key), context_slot) {
                        (Some(snapshot), _) => snapshot,
                        // Unanswered keys are recorded as absent at the batch's slot.
                        (None, Some(slot)) => {
                            debug!("No answer for {}, recording it as absent", key.short());
                            AccountSnapshot::absent(*key, slot, inner.client.endpoint())
                        }
                        (None, None) => {
                            warn!("No answer or slot for {}, leaving it unresolved", key.short());
                            continue;
                        }
                    };
                    inner.store.mark_resolved(*key);
                    let _ = inner.ingest_tx.send(snapshot);
                }
            }
            Err(e) => {
                // Dropped; the keys stay unresolved until the next request or poll.
                warn!("Batch resolution of {} accounts failed: {}", batch.len(), e);
            }
        }
    }
}

/// A pair popped by the subscribe task. Dropped unsettled (the task was aborted mid-call),
/// it goes back to the head of the queue.
struct InFlightPair<'a> {
    queue: &'a Mutex<SubscriptionQueue>,
    pair: Option<SubscriptionPair>,
}

impl<'a> InFlightPair<'a> {
    fn new(queue: &'a Mutex<SubscriptionQueue>, pair: SubscriptionPair) -> Self {
        Self {
            queue,
            pair: Some(pair),
        }
    }

    fn complete(mut self) {
        if let Some(pair) = self.pair.take() {
            self.queue.lock().complete(pair);
        }
    }

    fn fail(mut self) {
        if let Some(pair) = self.pair.take() {
            self.queue.lock().fail(&pair);
        }
    }
}

impl Drop for InFlightPair<'_> {
    fn drop(&mut self) {
        if let Some(pair) = self.pair.take() {
            debug!("Re-queued interrupted subscription for {} on {}", pair.0.short(), pair.1);
            self.queue.lock().retry(pair);
        }
    }
}

async fn subscribe_loop(inner: Arc<Inner>) {
    let mut ticker = tokio::time::interval(inner.config.subscribe_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(pair) = inner.subscriptions.lock().next() else {
            continue;
        };
        let (key, identity) = pair.clone();
        let in_flight = InFlightPair::new(&inner.subscriptions, pair);

        let client = inner.endpoints.lock().get(&identity).cloned();
        let Some(client) = client else {
            warn!("No client for endpoint {}", identity);
            in_flight.fail();
            continue;
        };

        match client
            .subscribe_account_change(&key, inner.ingest_tx.clone())
            .await
        {
            Ok(handle) => {
                info!(
                    "Subscribed to {} on {} (id {})",
                    key.short(),
                    identity,
                    handle.id
                );
                inner.handles.lock().insert((key, identity), handle);
                in_flight.complete();
            }
            Err(e) => {
                warn!("Failed to subscribe to {} on {}: {}", key.short(), identity, e);
                in_flight.fail();
            }
        }
    }
}

async fn poll_loop(inner: Arc<Inner>, key: AccountKey, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        inner.resolve_queue.lock().enqueue(key, true);
    }
}
