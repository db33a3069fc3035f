//!
//! Rolling pool of validity tokens (recent blockhashes).
//!
//! A background refill task keeps a small window of fresh tokens so callers that need one
//! rarely wait on the network. Tokens are kept oldest first and each token is handed out by a
//! consuming accessor at most once. Concurrent fetches share one in-flight request.

use crate::config::BlockhashPoolConfig;
use crate::rpc::{LatestBlockhash, LedgerClient};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use solana_sdk::hash::Hash;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A pooled validity token, stamped with the time the pool received it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityToken {
	pub blockhash: Hash,
	/// Slot at which the token was issued.
	pub slot: u64,
	/// Last block height at which a transaction carrying this token is accepted.
	pub last_valid_block_height: u64,
	pub retrieved_at: DateTime<Utc>,
}

impl ValidityToken {
	pub fn from_latest(latest: LatestBlockhash, retrieved_at: DateTime<Utc>) -> Self {
		Self {
			blockhash: latest.blockhash,
			slot: latest.slot,
			last_valid_block_height: latest.last_valid_block_height,
			retrieved_at,
		}
	}
}

type SharedFetch = Shared<BoxFuture<'static, Option<ValidityToken>>>;

#[derive(Default)]
struct PoolState {
	/// Oldest first.
	tokens: VecDeque<ValidityToken>,
	/// Every hash the pool has held or handed out.
	seen: HashSet<Hash>,
}

impl PoolState {
	/// Append a token unless its hash was seen before. Returns whether it was added.
	fn push(&mut self, token: ValidityToken, max_size: usize) -> bool {
		if !self.seen.insert(token.blockhash) {
			return false;
		}
		self.tokens.push_back(token);
		while self.tokens.len() > max_size {
			if let Some(evicted) = self.tokens.pop_front() {
				debug!("Evicted token {} (slot {})", evicted.blockhash, evicted.slot);
			}
		}
		true
	}
}

struct Inner {
	client: Arc<dyn LedgerClient>,
	config: BlockhashPoolConfig,
	state: Mutex<PoolState>,
	in_flight: Mutex<Option<SharedFetch>>,
	active: AtomicBool,
	refill_task: Mutex<Option<JoinHandle<()>>>,
}

/// Pool of validity tokens with a pausable background refill task.
pub struct BlockhashPool {
	inner: Arc<Inner>,
}

impl BlockhashPool {
	/// Create an empty pool. The refill task starts with [`BlockhashPool::set_loop_state`].
	pub fn new(client: Arc<dyn LedgerClient>, config: BlockhashPoolConfig) -> Self {
		Self {
			inner: Arc::new(Inner {
				client,
				config,
				state: Mutex::new(PoolState::default()),
				in_flight: Mutex::new(None),
				active: AtomicBool::new(false),
				refill_task: Mutex::new(None),
			}),
		}
	}

	/// Resume (`true`) or pause (`false`) the refill task. Pooled tokens are kept while paused.
	pub fn set_loop_state(&self, active: bool) {
		if active {
			if self.inner.active.swap(true, Ordering::SeqCst) {
				return;
			}
			let inner = self.inner.clone();
			*self.inner.refill_task.lock() = Some(tokio::spawn(refill_loop(inner)));
			info!("Blockhash refill started");
		} else {
			self.inner.active.store(false, Ordering::SeqCst);
			if let Some(task) = self.inner.refill_task.lock().take() {
				task.abort();
				info!("Blockhash refill paused");
			}
		}
	}

	pub fn is_active(&self) -> bool {
		self.inner.active.load(Ordering::SeqCst)
	}

	/// Newest pooled token without consuming it. Fetches one if the pool is empty.
	pub async fn peek(&self) -> Option<ValidityToken> {
		if let Some(token) = self.inner.state.lock().tokens.back().copied() {
			return Some(token);
		}
		let token = self.inner.fetch_token().await?;
		self.inner
			.state
			.lock()
			.push(token, self.inner.config.max_size);
		Some(token)
	}

	/// Remove and return the newest pooled token.
	///
	/// On an empty pool, fetch a fresh token up to `retries` times with a short delay
	/// between attempts. A fetched token that was already pooled or handed out does not
	/// count. Returns `None` once all attempts are spent.
	pub async fn pop(&self, retries: usize) -> Option<ValidityToken> {
		let attempts = retries.max(1);
		for attempt in 0..attempts {
			if let Some(token) = self.inner.state.lock().tokens.pop_back() {
				return Some(token);
			}
			if attempt > 0 {
				tokio::time::sleep(self.inner.config.retry_delay).await;
			}
			if let Some(token) = self.inner.fetch_token().await {
				if self.inner.state.lock().seen.insert(token.blockhash) {
					return Some(token);
				}
				debug!("Fetched token {} was already used", token.blockhash);
			}
		}
		warn!("No validity token available after {} attempts", attempts);
		None
	}

	/// [`BlockhashPool::pop`] with the configured retry count.
	pub async fn pop_default(&self) -> Option<ValidityToken> {
		self.pop(self.inner.config.pop_retries).await
	}

	/// Consume tokens oldest first until one stays valid through `min_block_height`.
	/// Every token passed over is discarded. `None` if no pooled token qualifies.
	pub fn pop_at_least_valid_for(&self, min_block_height: u64) -> Option<ValidityToken> {
		self.pop_first_matching(|token| token.last_valid_block_height >= min_block_height)
	}

	/// Same scan as [`BlockhashPool::pop_at_least_valid_for`], comparing issue slots.
	pub fn pop_at_least_valid_for_slot(&self, min_slot: u64) -> Option<ValidityToken> {
		self.pop_first_matching(|token| token.slot >= min_slot)
	}

	fn pop_first_matching(&self, accept: impl Fn(&ValidityToken) -> bool) -> Option<ValidityToken> {
		let mut state = self.inner.state.lock();
		while let Some(token) = state.tokens.pop_front() {
			if accept(&token) {
				return Some(token);
			}
			debug!(
				"Discarded token {} (slot {}, valid until {})",
				token.blockhash, token.slot, token.last_valid_block_height
			);
		}
		None
	}

	/// Number of pooled tokens.
	pub fn token_count(&self) -> usize {
		let state = self.inner.state.lock();
		if let (Some(oldest), Some(newest)) = (state.tokens.front(), state.tokens.back()) {
			debug!(
				"{} pooled tokens, oldest retrieved {}, newest retrieved {}",
				state.tokens.len(),
				oldest.retrieved_at,
				newest.retrieved_at
			);
		}
		state.tokens.len()
	}

	/// Number of distinct tokens the pool has ever held or handed out.
	pub fn history_len(&self) -> usize {
		self.inner.state.lock().seen.len()
	}

	/// Run one refill step: fetch and pool a token if it is new. Returns whether one was added.
	pub async fn refill_once(&self) -> bool {
		self.inner.refill_once().await
	}
}

impl Drop for BlockhashPool {
	fn drop(&mut self) {
		if let Some(task) = self.inner.refill_task.lock().take() {
			task.abort();
		}
	}
}

impl Inner {
	/// Join the in-flight fetch or start one.
	fn shared_fetch(self: &Arc<Self>) -> SharedFetch {
		let mut in_flight = self.in_flight.lock();
		if let Some(fetch) = in_flight.as_ref() {
			return fetch.clone();
		}

		let inner = self.clone();
		let fetch = async move {
			match inner.client.get_latest_blockhash(inner.config.commitment).await {
				Ok(latest) => Some(ValidityToken::from_latest(latest, Utc::now())),
				Err(e) => {
					warn!("Failed to fetch latest blockhash: {}", e);
					None
				}
			}
		}
		.boxed()
		.shared();
		*in_flight = Some(fetch.clone());
		fetch
	}

	async fn fetch_token(self: &Arc<Self>) -> Option<ValidityToken> {
		let fetch = self.shared_fetch();
		let token = fetch.clone().await;
		let mut in_flight = self.in_flight.lock();
		if in_flight.as_ref().is_some_and(|current| current.ptr_eq(&fetch)) {
			*in_flight = None;
		}
		token
	}

	async fn refill_once(self: &Arc<Self>) -> bool {
		let Some(token) = self.fetch_token().await else {
			return false;
		};
		let added = self.state.lock().push(token, self.config.max_size);
		if added {
			debug!("Pooled token {} (slot {})", token.blockhash, token.slot);
		}
		added
	}
}

async fn refill_loop(inner: Arc<Inner>) {
	while inner.active.load(Ordering::SeqCst) {
		let fetched = inner.fetch_token().await;
		if let Some(token) = fetched {
			if inner.state.lock().push(token, inner.config.max_size) {
				debug!("Pooled token {} (slot {})", token.blockhash, token.slot);
			}
		}

		let len = inner.state.lock().tokens.len();
		let delay = if fetched.is_none() || len < inner.config.fast_fill_threshold {
			inner.config.fast_delay
		} else {
			inner.config.slow_delay
		};
		tokio::time::sleep(delay).await;
	}
}
