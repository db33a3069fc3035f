//!
//! JSON-RPC client for a Solana-compatible ledger endpoint.
//!
//! Point and batch lookups, validity-token issuance, simulation and raw submission go over
//! HTTP; account change subscriptions use the WebSocket `accountSubscribe` method with one
//! socket per subscription. All methods are async and designed for use with Tokio.

use super::ledger::LedgerClient;
use super::types::*;
use crate::config::RpcConfig;
use crate::key::AccountKey;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::{SinkExt, StreamExt};
use itertools::Itertools;
use reqwest::Client;
use serde_json::{Value, json};
use solana_sdk::hash::Hash;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::UnboundedSender;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Solana JSON-RPC client
#[derive(Clone)]
pub struct SolanaRpcClient {
	/// The underlying HTTP client for JSON-RPC requests.
	http_client: Client,
	/// HTTP endpoint, also used as the endpoint identity.
	rpc_url: String,
	/// WebSocket endpoint for subscriptions.
	ws_url: String,
	commitment: Commitment,
	chunk_size: usize,
	ws_ping_interval: std::time::Duration,
	next_id: Arc<AtomicU64>,
}

impl SolanaRpcClient {
	/// Create a new client from connection settings.
	///
	/// # Errors
	/// Returns `RpcError::HttpError` if the HTTP client cannot be built.
	pub fn new(config: &RpcConfig) -> Result<Self, RpcError> {
		let http_client = Client::builder().timeout(config.request_timeout).build()?;

		Ok(Self {
			http_client,
			rpc_url: config.rpc_url.clone(),
			ws_url: config.ws_url.clone(),
			commitment: config.commitment,
			chunk_size: config.multiple_accounts_chunk_size.max(1),
			ws_ping_interval: config.ws_ping_interval,
			next_id: Arc::new(AtomicU64::new(1)),
		})
	}

	/// Execute a JSON-RPC request and return its `result` member.
	///
	/// # Errors
	/// Returns `RpcError::JsonRpc` for non-success HTTP statuses and for `error` members in
	/// the response body.
	pub async fn execute_request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let request_body = json!({
			"jsonrpc": "2.0",
			"id": id,
			"method": method,
			"params": params,
		});

		let response = self
			.http_client
			.post(&self.rpc_url)
			.header("Content-Type", "application/json")
			.json(&request_body)
			.send()
			.await?;

		if !response.status().is_success() {
			return Err(RpcError::JsonRpc {
				code: i64::from(response.status().as_u16()),
				message: format!("HTTP error: {}", response.status()),
			});
		}

		let mut response_json: Value = response.json().await?;

		if let Some(error) = response_json.get("error") {
			return Err(json_rpc_error(error));
		}

		match response_json.get_mut("result").map(Value::take) {
			Some(result) => Ok(result),
			None => Err(RpcError::NoData),
		}
	}

	fn account_config(&self) -> Value {
		json!({
			"encoding": "base64",
			"commitment": self.commitment.as_str(),
		})
	}

	async fn get_multiple_accounts_chunk(
		&self,
		keys: &[AccountKey],
	) -> Result<HashMap<AccountKey, AccountSnapshot>, RpcError> {
		let addresses: Vec<String> = keys.iter().map(AccountKey::to_base58).collect();
		let result = self
			.execute_request(
				"getMultipleAccounts",
				json!([addresses, self.account_config()]),
			)
			.await?;
		let response: RpcResponse<Vec<Option<UiAccount>>> = serde_json::from_value(result)?;
		Ok(snapshots_from_response(keys, response, &self.rpc_url))
	}

	/// Open a WebSocket, send `method` with `params` and wait for the subscription id.
	///
	/// A listener task then hands every text frame to `on_text`, which returns `Ok(false)` once
	/// its sink is closed. Parse failures are logged and the subscription keeps running.
	async fn open_subscription<F>(
		&self,
		label: String,
		method: &str,
		params: Value,
		mut on_text: F,
	) -> Result<SubscriptionHandle, RpcError>
	where
		F: FnMut(&str) -> Result<bool, RpcError> + Send + 'static,
	{
		debug!("Attempting WebSocket connection to: {}", self.ws_url);
		let (ws_stream, response) = connect_async(self.ws_url.as_str()).await?;
		debug!(
			"WebSocket connection established, response status: {}",
			response.status()
		);
		let (mut ws_sender, mut ws_receiver) = ws_stream.split();

		let subscribe_message = json!({
			"jsonrpc": "2.0",
			"id": 1,
			"method": method,
			"params": params,
		});
		ws_sender
			.send(Message::Text(subscribe_message.to_string()))
			.await?;

		// Wait for the subscription id
		let subscription_id = loop {
			let Some(msg) = ws_receiver.next().await else {
				return Err(RpcError::SubscriptionError(
					"Socket closed before subscription was acknowledged".to_string(),
				));
			};
			match msg? {
				Message::Text(text) => {
					let parsed: Value = serde_json::from_str(&text)?;
					if let Some(error) = parsed.get("error") {
						return Err(json_rpc_error(error));
					}
					if parsed.get("id").and_then(Value::as_u64) == Some(1) {
						break parsed
							.get("result")
							.and_then(Value::as_u64)
							.ok_or(RpcError::NoData)?;
					}
					debug!("Ignoring message before subscription ack: {}", text);
				}
				Message::Close(_) => {
					return Err(RpcError::SubscriptionError(
						"Socket closed during handshake".to_string(),
					));
				}
				_ => {}
			}
		};

		info!(
			"Subscribed to {} on {} (subscription {})",
			label, self.ws_url, subscription_id
		);

		let ping_interval = self.ws_ping_interval;
		let listener = tokio::spawn(async move {
			let mut ping = tokio::time::interval(ping_interval);
			ping.tick().await;
			loop {
				tokio::select! {
					msg = ws_receiver.next() => {
						let Some(msg) = msg else {
							warn!("Subscription socket for {} ended", label);
							break;
						};
						match msg {
							Ok(Message::Text(text)) => match on_text(&text) {
								Ok(true) => {}
								Ok(false) => {
									debug!("Sink for {} closed, dropping subscription", label);
									break;
								}
								Err(e) => {
									warn!("Failed to parse notification for {}: {}", label, e);
								}
							},
							Ok(Message::Close(_)) => {
								warn!("Subscription socket for {} closed by server", label);
								break;
							}
							Ok(_) => {}
							Err(e) => {
								error!("Error in subscription for {}: {}", label, e);
								break;
							}
						}
					}
					_ = ping.tick() => {
						if let Err(e) = ws_sender.send(Message::Ping(Vec::new())).await {
							error!("Failed to ping subscription socket for {}: {}", label, e);
							break;
						}
					}
				}
			}
		});

		Ok(SubscriptionHandle::new(
			subscription_id,
			self.rpc_url.clone(),
			Some(listener),
		))
	}
}

#[async_trait::async_trait]
impl LedgerClient for SolanaRpcClient {
	fn endpoint(&self) -> &str {
		&self.rpc_url
	}

	async fn get_account(&self, key: &AccountKey) -> Result<Option<AccountSnapshot>, RpcError> {
		let result = self
			.execute_request(
				"getAccountInfo",
				json!([key.to_base58(), self.account_config()]),
			)
			.await?;
		let response: RpcResponse<Option<UiAccount>> = serde_json::from_value(result)?;
		response
			.value
			.map(|account| account.into_snapshot(*key, response.context.slot, &self.rpc_url))
			.transpose()
	}

	async fn get_multiple_accounts(
		&self,
		keys: &[AccountKey],
	) -> Result<HashMap<AccountKey, AccountSnapshot>, RpcError> {
		let chunks: Vec<Vec<AccountKey>> = keys
			.iter()
			.copied()
			.chunks(self.chunk_size)
			.into_iter()
			.map(|chunk| chunk.collect())
			.collect();

		let results = futures::future::try_join_all(
			chunks
				.iter()
				.map(|chunk| self.get_multiple_accounts_chunk(chunk)),
		)
		.await?;

		Ok(results.into_iter().flatten().collect())
	}

	async fn subscribe_account_change(
		&self,
		key: &AccountKey,
		sink: UnboundedSender<AccountSnapshot>,
	) -> Result<SubscriptionHandle, RpcError> {
		let key = *key;
		let endpoint = self.rpc_url.clone();
		self.open_subscription(
			format!("account {}", key),
			"accountSubscribe",
			json!([key.to_base58(), self.account_config()]),
			move |text| match parse_account_notification(text, key, &endpoint)? {
				Some(snapshot) => Ok(sink.send(snapshot).is_ok()),
				None => Ok(true),
			},
		)
		.await
	}

	async fn subscribe_logs(
		&self,
		filter: LogsFilter,
		sink: UnboundedSender<LogsNotification>,
	) -> Result<SubscriptionHandle, RpcError> {
		self.open_subscription(
			format!("logs {}", filter),
			"logsSubscribe",
			json!([filter.to_param(), { "commitment": self.commitment.as_str() }]),
			move |text| match parse_logs_notification(text, filter)? {
				Some(notification) => Ok(sink.send(notification).is_ok()),
				None => Ok(true),
			},
		)
		.await
	}

	async fn get_latest_blockhash(
		&self,
		commitment: Commitment,
	) -> Result<LatestBlockhash, RpcError> {
		let result = self
			.execute_request(
				"getLatestBlockhash",
				json!([{ "commitment": commitment.as_str() }]),
			)
			.await?;
		let response: RpcResponse<UiLatestBlockhash> = serde_json::from_value(result)?;
		let blockhash = Hash::from_str(&response.value.blockhash)
			.map_err(|e| RpcError::DecodeError(format!("Invalid blockhash: {}", e)))?;

		Ok(LatestBlockhash {
			blockhash,
			slot: response.context.slot,
			last_valid_block_height: response.value.last_valid_block_height,
		})
	}

	async fn simulate_transaction(
		&self,
		transaction: &VersionedTransaction,
		options: SimulateOptions,
	) -> Result<SimulationResponse, RpcError> {
		let bytes =
			bincode::serialize(transaction).map_err(|e| RpcError::EncodeError(e.to_string()))?;

		let mut config = json!({
			"encoding": "base64",
			"sigVerify": options.sig_verify,
			"replaceRecentBlockhash": options.replace_recent_blockhash,
			"commitment": options.commitment.unwrap_or(self.commitment).as_str(),
		});
		if !options.account_addresses.is_empty() {
			config["accounts"] = json!({
				"encoding": "base64",
				"addresses": options
					.account_addresses
					.iter()
					.map(AccountKey::to_base58)
					.collect::<Vec<_>>(),
			});
		}

		debug!("Simulating transaction @ {}", self.rpc_url);
		let result = self
			.execute_request("simulateTransaction", json!([BASE64.encode(bytes), config]))
			.await?;
		let response: RpcResponse<SimulationResponse> = serde_json::from_value(result)?;
		Ok(response.value)
	}

	async fn send_raw_transaction(
		&self,
		bytes: &[u8],
		options: SendOptions,
	) -> Result<Signature, RpcError> {
		let mut config = json!({
			"encoding": "base64",
			"skipPreflight": options.skip_preflight,
			"preflightCommitment": options.preflight_commitment.as_str(),
		});
		if let Some(max_retries) = options.max_retries {
			config["maxRetries"] = json!(max_retries);
		}
		if let Some(min_context_slot) = options.min_context_slot {
			config["minContextSlot"] = json!(min_context_slot);
		}

		let result = self
			.execute_request("sendTransaction", json!([BASE64.encode(bytes), config]))
			.await?;
		let signature = result.as_str().ok_or(RpcError::NoData)?;
		Signature::from_str(signature)
			.map_err(|e| RpcError::DecodeError(format!("Invalid signature: {}", e)))
	}
}

fn json_rpc_error(error: &Value) -> RpcError {
	RpcError::JsonRpc {
		code: error.get("code").and_then(Value::as_i64).unwrap_or(-1),
		message: error
			.get("message")
			.and_then(Value::as_str)
			.unwrap_or("Unknown JSON-RPC error")
			.to_string(),
	}
}

/// Pair a `getMultipleAccounts` answer with the requested keys. Accounts that are missing or
/// do not decode become absent snapshots at the response slot.
fn snapshots_from_response(
	keys: &[AccountKey],
	response: RpcResponse<Vec<Option<UiAccount>>>,
	endpoint: &str,
) -> HashMap<AccountKey, AccountSnapshot> {
	let slot = response.context.slot;
	let mut accounts = response.value.into_iter();
	keys.iter()
		.map(|key| {
			let snapshot = match accounts.next().flatten() {
				Some(account) => account
					.into_snapshot(*key, slot, endpoint)
					.unwrap_or_else(|e| {
						warn!("Undecodable account {}, treating as absent: {}", key, e);
						AccountSnapshot::absent(*key, slot, endpoint)
					}),
				None => AccountSnapshot::absent(*key, slot, endpoint),
			};
			(*key, snapshot)
		})
		.collect()
}

/// Decode a `logsNotification` frame. Other frames yield `Ok(None)`.
fn parse_logs_notification(
	text: &str,
	filter: LogsFilter,
) -> Result<Option<LogsNotification>, RpcError> {
	let parsed: Value = serde_json::from_str(text)?;
	if parsed.get("method").and_then(Value::as_str) != Some("logsNotification") {
		return Ok(None);
	}
	let result = parsed
		.get("params")
		.and_then(|p| p.get("result"))
		.cloned()
		.ok_or(RpcError::NoData)?;
	let response: RpcResponse<UiLogs> = serde_json::from_value(result)?;
	Ok(Some(LogsNotification {
		filter,
		signature: response.value.signature,
		err: response.value.err.filter(|e| !e.is_null()),
		logs: response.value.logs,
		slot: response.context.slot,
	}))
}

/// Decode an `accountNotification` frame. Other frames yield `Ok(None)`.
fn parse_account_notification(
	text: &str,
	key: AccountKey,
	endpoint: &str,
) -> Result<Option<AccountSnapshot>, RpcError> {
	let parsed: Value = serde_json::from_str(text)?;
	if parsed.get("method").and_then(Value::as_str) != Some("accountNotification") {
		return Ok(None);
	}
	let result = parsed
		.get("params")
		.and_then(|p| p.get("result"))
		.cloned()
		.ok_or(RpcError::NoData)?;
	let response: RpcResponse<Option<UiAccount>> = serde_json::from_value(result)?;
	let snapshot = match response.value {
		Some(account) => account.into_snapshot(key, response.context.slot, endpoint)?,
		None => AccountSnapshot::absent(key, response.context.slot, endpoint),
	};
	Ok(Some(snapshot))
}
