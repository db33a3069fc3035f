//! Types exchanged with the remote ledger: snapshots, validity tokens, simulation results and
//! the JSON-RPC wire shapes they are decoded from.

use crate::key::{AccountKey, ParseKeyError};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use solana_sdk::hash::Hash;
use std::fmt;
use tokio::task::JoinHandle;

/// Durability level requested for a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
	#[default]
	Processed,
	Confirmed,
	Finalized,
}

impl Commitment {
	pub fn as_str(&self) -> &'static str {
		match self {
			Commitment::Processed => "processed",
			Commitment::Confirmed => "confirmed",
			Commitment::Finalized => "finalized",
		}
	}
}

impl std::str::FromStr for Commitment {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"processed" => Ok(Commitment::Processed),
			"confirmed" => Ok(Commitment::Confirmed),
			"finalized" => Ok(Commitment::Finalized),
			other => Err(other.to_string()),
		}
	}
}

impl fmt::Display for Commitment {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Latest known state of a single account as reported by one endpoint.
///
/// `raw_data == None` marks an account that did not exist at `slot`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSnapshot {
	pub key: AccountKey,
	pub raw_data: Option<Vec<u8>>,
	pub owner_program: Option<AccountKey>,
	pub lamports: u64,
	pub slot: u64,
	pub source_endpoint: String,
}

impl AccountSnapshot {
	/// Snapshot for an account the endpoint reported as missing.
	pub fn absent(key: AccountKey, slot: u64, source_endpoint: impl Into<String>) -> Self {
		Self {
			key,
			raw_data: None,
			owner_program: None,
			lamports: 0,
			slot,
			source_endpoint: source_endpoint.into(),
		}
	}

	pub fn exists(&self) -> bool {
		self.raw_data.is_some()
	}
}

/// Validity token as returned by the ledger, before the pool stamps it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatestBlockhash {
	pub blockhash: Hash,
	pub slot: u64,
	pub last_valid_block_height: u64,
}

/// Handle for a registered live subscription. Dropping it leaves the subscription running;
/// call [`SubscriptionHandle::cancel`] to stop delivery.
#[derive(Debug)]
pub struct SubscriptionHandle {
	pub id: u64,
	pub endpoint: String,
	listener: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
	pub fn new(id: u64, endpoint: impl Into<String>, listener: Option<JoinHandle<()>>) -> Self {
		Self {
			id,
			endpoint: endpoint.into(),
			listener,
		}
	}

	pub fn cancel(mut self) {
		if let Some(listener) = self.listener.take() {
			listener.abort();
		}
	}
}

/// Which transactions a logs subscription reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogsFilter {
	/// Every transaction except simple votes.
	All,
	/// Transactions that reference the account.
	Mentions(AccountKey),
}

impl LogsFilter {
	/// Filter argument of `logsSubscribe`.
	pub fn to_param(&self) -> serde_json::Value {
		match self {
			LogsFilter::All => serde_json::json!("all"),
			LogsFilter::Mentions(key) => serde_json::json!({ "mentions": [key.to_base58()] }),
		}
	}
}

impl fmt::Display for LogsFilter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			LogsFilter::All => f.write_str("all"),
			LogsFilter::Mentions(key) => write!(f, "mentions {}", key.short()),
		}
	}
}

/// Logs emitted by one transaction, as delivered by a logs subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogsNotification {
	/// Filter of the subscription that delivered it.
	pub filter: LogsFilter,
	pub signature: String,
	/// Structured ledger error when the transaction failed.
	pub err: Option<serde_json::Value>,
	pub logs: Vec<String>,
	pub slot: u64,
}

/// `logsNotification` value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiLogs {
	pub signature: String,
	#[serde(default)]
	pub err: Option<serde_json::Value>,
	#[serde(default)]
	pub logs: Vec<String>,
}

/// Options forwarded to `simulateTransaction`.
#[derive(Debug, Clone, Default)]
pub struct SimulateOptions {
	pub sig_verify: bool,
	pub replace_recent_blockhash: bool,
	pub commitment: Option<Commitment>,
	/// Accounts whose post-execution state should be returned.
	pub account_addresses: Vec<AccountKey>,
}

/// Options forwarded to `sendTransaction`.
#[derive(Debug, Clone)]
pub struct SendOptions {
	pub skip_preflight: bool,
	pub preflight_commitment: Commitment,
	pub max_retries: Option<usize>,
	pub min_context_slot: Option<u64>,
}

impl Default for SendOptions {
	fn default() -> Self {
		Self {
			skip_preflight: true,
			preflight_commitment: Commitment::Processed,
			max_retries: Some(3),
			min_context_slot: None,
		}
	}
}

/// Slot context attached to most ledger responses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RpcContext {
	pub slot: u64,
}

/// `{ context, value }` envelope used by context-carrying RPC methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse<T> {
	pub context: RpcContext,
	pub value: T,
}

/// Account as encoded in JSON-RPC responses and notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiAccount {
	pub lamports: u64,
	/// `[payload, encoding]`; this client always requests `base64`.
	pub data: (String, String),
	pub owner: String,
	#[serde(default)]
	pub executable: bool,
	#[serde(default)]
	pub rent_epoch: Option<u64>,
}

impl UiAccount {
	pub fn decode_data(&self) -> Result<Vec<u8>, RpcError> {
		let (payload, encoding) = &self.data;
		if encoding != "base64" {
			return Err(RpcError::DecodeError(format!(
				"unsupported account encoding: {}",
				encoding
			)));
		}
		BASE64
			.decode(payload)
			.map_err(|e| RpcError::DecodeError(format!("invalid base64 account data: {}", e)))
	}

	pub fn into_snapshot(
		self,
		key: AccountKey,
		slot: u64,
		source_endpoint: &str,
	) -> Result<AccountSnapshot, RpcError> {
		let raw_data = self.decode_data()?;
		let owner_program = self.owner.parse::<AccountKey>()?;
		Ok(AccountSnapshot {
			key,
			raw_data: Some(raw_data),
			owner_program: Some(owner_program),
			lamports: self.lamports,
			slot,
			source_endpoint: source_endpoint.to_string(),
		})
	}
}

/// `getLatestBlockhash` value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiLatestBlockhash {
	pub blockhash: String,
	pub last_valid_block_height: u64,
}

/// `simulateTransaction` value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResponse {
	/// Structured ledger error, e.g. `{"InstructionError":[0,{"Custom":6001}]}`.
	#[serde(default)]
	pub err: Option<serde_json::Value>,
	#[serde(default)]
	pub logs: Option<Vec<String>>,
	/// Post-execution state of the requested accounts, positionally matched.
	#[serde(default)]
	pub accounts: Option<Vec<Option<UiAccount>>>,
	#[serde(default)]
	pub units_consumed: Option<u64>,
}

/// Error types for remote ledger calls
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
	#[error("JSON-RPC error {code}: {message}")]
	JsonRpc { code: i64, message: String },

	#[error("No data returned")]
	NoData,

	#[error("WebSocket error: {0}")]
	WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

	#[error("HTTP error: {0}")]
	HttpError(#[from] reqwest::Error),

	#[error("JSON parse error: {0}")]
	JsonError(#[from] serde_json::Error),

	#[error("Decode error: {0}")]
	DecodeError(String),

	#[error("Encode error: {0}")]
	EncodeError(String),

	#[error("Invalid key: {0}")]
	InvalidKey(#[from] ParseKeyError),

	#[error("Subscription error: {0}")]
	SubscriptionError(String),
}
