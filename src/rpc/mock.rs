//! In-memory ledger used by unit tests.

use super::ledger::LedgerClient;
use super::types::*;
use crate::key::AccountKey;
use parking_lot::Mutex;
use solana_sdk::hash::Hash;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Default)]
pub(crate) struct MockState {
	pub accounts: HashMap<AccountKey, AccountSnapshot>,
	/// Slot reported for batched lookups of missing accounts.
	pub context_slot: u64,
	/// Tokens handed out by `get_latest_blockhash`; the last one repeats once drained.
	pub blockhashes: VecDeque<LatestBlockhash>,
	pub last_blockhash: Option<LatestBlockhash>,
	pub fail_blockhash: bool,
	/// Simulated latency of `get_latest_blockhash`.
	pub blockhash_delay: Option<Duration>,
	pub fail_batch: bool,
	/// Keys left out of batched lookup answers.
	pub omitted: HashSet<AccountKey>,
	/// Number of upcoming subscribe calls that fail.
	pub subscribe_failures: usize,
	/// Simulated latency of `subscribe_account_change`, after the call is recorded.
	pub subscribe_delay: Option<Duration>,
	pub sinks: HashMap<AccountKey, UnboundedSender<AccountSnapshot>>,
	pub log_failures: usize,
	pub log_sinks: HashMap<LogsFilter, UnboundedSender<LogsNotification>>,
	pub log_subscribe_calls: Vec<LogsFilter>,
	pub simulation: SimulationResponse,
	pub simulated: Vec<SimulateOptions>,
	pub sent: Vec<Vec<u8>>,
	pub get_account_calls: usize,
	pub batch_calls: Vec<Vec<AccountKey>>,
	pub subscribe_calls: Vec<AccountKey>,
	pub blockhash_calls: usize,
}

pub(crate) struct MockLedgerClient {
	endpoint: String,
	pub state: Mutex<MockState>,
}

impl MockLedgerClient {
	pub fn new(endpoint: &str) -> Self {
		Self {
			endpoint: endpoint.to_string(),
			state: Mutex::new(MockState::default()),
		}
	}

	pub fn set_account(&self, snapshot: AccountSnapshot) {
		self.state.lock().accounts.insert(snapshot.key, snapshot);
	}

	pub fn push_blockhash(&self, seed: u8, slot: u64, last_valid_block_height: u64) {
		self.state.lock().blockhashes.push_back(LatestBlockhash {
			blockhash: Hash::new_from_array([seed; 32]),
			slot,
			last_valid_block_height,
		});
	}

	/// Deliver a snapshot through the registered subscription for its key.
	pub fn notify(&self, snapshot: AccountSnapshot) -> bool {
		let state = self.state.lock();
		match state.sinks.get(&snapshot.key) {
			Some(sink) => sink.send(snapshot).is_ok(),
			None => false,
		}
	}

	/// Deliver a logs notification through the subscription for its filter.
	pub fn notify_logs(&self, notification: LogsNotification) -> bool {
		let state = self.state.lock();
		match state.log_sinks.get(&notification.filter) {
			Some(sink) => sink.send(notification).is_ok(),
			None => false,
		}
	}
}

pub(crate) fn logs(filter: LogsFilter, signature: &str, slot: u64) -> LogsNotification {
	LogsNotification {
		filter,
		signature: signature.to_string(),
		err: None,
		logs: vec![format!("Program log: {}", signature)],
		slot,
	}
}

pub(crate) fn snapshot(key: AccountKey, slot: u64, data: &[u8]) -> AccountSnapshot {
	AccountSnapshot {
		key,
		raw_data: Some(data.to_vec()),
		owner_program: Some(AccountKey::new([0xee; 32])),
		lamports: 1,
		slot,
		source_endpoint: "mock".to_string(),
	}
}

#[async_trait::async_trait]
impl LedgerClient for MockLedgerClient {
	fn endpoint(&self) -> &str {
		&self.endpoint
	}

	async fn get_account(&self, key: &AccountKey) -> Result<Option<AccountSnapshot>, RpcError> {
		let mut state = self.state.lock();
		state.get_account_calls += 1;
		Ok(state.accounts.get(key).cloned())
	}

	async fn get_multiple_accounts(
		&self,
		keys: &[AccountKey],
	) -> Result<HashMap<AccountKey, AccountSnapshot>, RpcError> {
		let mut state = self.state.lock();
		state.batch_calls.push(keys.to_vec());
		if state.fail_batch {
			return Err(RpcError::NoData);
		}
		let slot = state.context_slot;
		Ok(keys
			.iter()
			.filter(|key| !state.omitted.contains(key))
			.map(|key| {
				let snapshot = state
					.accounts
					.get(key)
					.cloned()
					.unwrap_or_else(|| AccountSnapshot::absent(*key, slot, "mock"));
				(*key, snapshot)
			})
			.collect())
	}

	async fn subscribe_account_change(
		&self,
		key: &AccountKey,
		sink: UnboundedSender<AccountSnapshot>,
	) -> Result<SubscriptionHandle, RpcError> {
		let delay = {
			let mut state = self.state.lock();
			state.subscribe_calls.push(*key);
			state.subscribe_delay
		};
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		let mut state = self.state.lock();
		if state.subscribe_failures > 0 {
			state.subscribe_failures -= 1;
			return Err(RpcError::SubscriptionError("mock failure".to_string()));
		}
		state.sinks.insert(*key, sink);
		let id = state.subscribe_calls.len() as u64;
		Ok(SubscriptionHandle::new(id, self.endpoint.clone(), None))
	}

	async fn subscribe_logs(
		&self,
		filter: LogsFilter,
		sink: UnboundedSender<LogsNotification>,
	) -> Result<SubscriptionHandle, RpcError> {
		let mut state = self.state.lock();
		state.log_subscribe_calls.push(filter);
		if state.log_failures > 0 {
			state.log_failures -= 1;
			return Err(RpcError::SubscriptionError("mock failure".to_string()));
		}
		state.log_sinks.insert(filter, sink);
		let id = state.log_subscribe_calls.len() as u64;
		Ok(SubscriptionHandle::new(id, self.endpoint.clone(), None))
	}

	async fn get_latest_blockhash(
		&self,
		_commitment: Commitment,
	) -> Result<LatestBlockhash, RpcError> {
		let delay = {
			let mut state = self.state.lock();
			state.blockhash_calls += 1;
			state.blockhash_delay
		};
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		let mut state = self.state.lock();
		if state.fail_blockhash {
			return Err(RpcError::NoData);
		}
		if let Some(next) = state.blockhashes.pop_front() {
			state.last_blockhash = Some(next);
		}
		state.last_blockhash.ok_or(RpcError::NoData)
	}

	async fn simulate_transaction(
		&self,
		_transaction: &VersionedTransaction,
		options: SimulateOptions,
	) -> Result<SimulationResponse, RpcError> {
		let mut state = self.state.lock();
		state.simulated.push(options);
		Ok(state.simulation.clone())
	}

	async fn send_raw_transaction(
		&self,
		bytes: &[u8],
		_options: SendOptions,
	) -> Result<Signature, RpcError> {
		self.state.lock().sent.push(bytes.to_vec());
		Ok(Signature::default())
	}
}
