//! Capability surface consumed from the remote ledger.

use super::types::*;
use crate::key::AccountKey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;

/// Remote ledger client.
///
/// Implementations own connection handling and wire encoding. Subscriptions are
/// at-least-once with no ordering guarantee across independent calls; consumers are expected
/// to order snapshots by slot themselves.
#[async_trait::async_trait]
pub trait LedgerClient: Send + Sync {
	/// Identity of the endpoint this client talks to. Two clients with the same identity are
	/// treated as the same endpoint for subscription de-duplication.
	fn endpoint(&self) -> &str;

	/// Point lookup. `Ok(None)` when the account does not exist.
	async fn get_account(&self, key: &AccountKey) -> Result<Option<AccountSnapshot>, RpcError>;

	/// Batched lookup. Every requested key is answered: accounts that are missing or whose
	/// data cannot be decoded come back as absent snapshots carrying the response slot.
	async fn get_multiple_accounts(
		&self,
		keys: &[AccountKey],
	) -> Result<HashMap<AccountKey, AccountSnapshot>, RpcError>;

	/// Register a live subscription. Every change notification for `key` is pushed into
	/// `sink` until the returned handle is cancelled or the sink is closed.
	async fn subscribe_account_change(
		&self,
		key: &AccountKey,
		sink: UnboundedSender<AccountSnapshot>,
	) -> Result<SubscriptionHandle, RpcError>;

	/// Register a logs subscription. Logs of every transaction matching `filter` are pushed
	/// into `sink`, stamped with the filter, until the handle is cancelled or the sink closes.
	async fn subscribe_logs(
		&self,
		filter: LogsFilter,
		sink: UnboundedSender<LogsNotification>,
	) -> Result<SubscriptionHandle, RpcError>;

	async fn get_latest_blockhash(
		&self,
		commitment: Commitment,
	) -> Result<LatestBlockhash, RpcError>;

	async fn simulate_transaction(
		&self,
		transaction: &VersionedTransaction,
		options: SimulateOptions,
	) -> Result<SimulationResponse, RpcError>;

	async fn send_raw_transaction(
		&self,
		bytes: &[u8],
		options: SendOptions,
	) -> Result<Signature, RpcError>;
}
