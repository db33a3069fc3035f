//! Configuration for the ledger client, account cache, token pool and transaction assembler.
//!
//! Every struct has a `Default` matching the values the components were tuned with; callers
//! override individual fields before passing the config to a constructor.

use crate::rpc::Commitment;
use solana_sdk::packet::PACKET_DATA_SIZE;
use std::time::Duration;

/// Connection settings for [`crate::rpc::SolanaRpcClient`].
#[derive(Debug, Clone)]
pub struct RpcConfig {
	/// HTTP JSON-RPC endpoint.
	pub rpc_url: String,
	/// WebSocket endpoint used for live subscriptions.
	pub ws_url: String,
	/// Commitment applied to reads and subscriptions.
	pub commitment: Commitment,
	pub request_timeout: Duration,
	/// Keys per `getMultipleAccounts` request.
	pub multiple_accounts_chunk_size: usize,
	/// Keep-alive ping interval on subscription sockets.
	pub ws_ping_interval: Duration,
}

impl Default for RpcConfig {
	fn default() -> Self {
		Self {
			rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
			ws_url: "wss://api.mainnet-beta.solana.com".to_string(),
			commitment: Commitment::Processed,
			request_timeout: Duration::from_secs(30),
			multiple_accounts_chunk_size: 99,
			ws_ping_interval: Duration::from_secs(30),
		}
	}
}

impl RpcConfig {
	/// Build from `LEDGER_RPC_URL`, `LEDGER_WS_URL` and `LEDGER_COMMITMENT`, falling back to
	/// the defaults for anything unset. When only the HTTP URL is given the WebSocket URL is
	/// derived from it.
	pub fn from_env() -> Self {
		let mut config = Self::default();
		if let Ok(url) = std::env::var("LEDGER_RPC_URL") {
			config.ws_url = url
				.replacen("https://", "wss://", 1)
				.replacen("http://", "ws://", 1);
			config.rpc_url = url;
		}
		if let Ok(url) = std::env::var("LEDGER_WS_URL") {
			config.ws_url = url;
		}
		if let Some(commitment) = std::env::var("LEDGER_COMMITMENT")
			.ok()
			.and_then(|c| c.parse().ok())
		{
			config.commitment = commitment;
		}
		config
	}
}

/// Settings for [`crate::cache::AccountStateCache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
	/// Tick of the batched resolve task.
	pub resolve_interval: Duration,
	/// Tick of the subscribe task; one pending subscription is registered per tick.
	pub subscribe_interval: Duration,
	/// Maximum keys resolved per tick.
	pub resolve_batch_size: usize,
	/// Capacity of each per-key broadcast channel. Slow subscribers that fall further behind
	/// skip ahead to newer snapshots.
	pub stream_capacity: usize,
}

impl Default for CacheConfig {
	fn default() -> Self {
		Self {
			resolve_interval: Duration::from_millis(1000),
			subscribe_interval: Duration::from_millis(1000),
			resolve_batch_size: 100,
			stream_capacity: 64,
		}
	}
}

/// Settings for [`crate::blockhash::BlockhashPool`].
#[derive(Debug, Clone)]
pub struct BlockhashPoolConfig {
	/// Maximum pooled tokens; the oldest is evicted on overflow.
	pub max_size: usize,
	/// Refill delay while the pool is below `fast_fill_threshold`.
	pub fast_delay: Duration,
	/// Refill delay once the pool is adequately filled.
	pub slow_delay: Duration,
	pub fast_fill_threshold: usize,
	/// Default attempts for [`crate::blockhash::BlockhashPool::pop`] on an empty pool.
	pub pop_retries: usize,
	pub retry_delay: Duration,
	pub commitment: Commitment,
}

impl Default for BlockhashPoolConfig {
	fn default() -> Self {
		Self {
			max_size: 100,
			fast_delay: Duration::from_secs(2),
			slow_delay: Duration::from_secs(10),
			fast_fill_threshold: 2,
			pop_retries: 4,
			retry_delay: Duration::from_millis(200),
			commitment: Commitment::Finalized,
		}
	}
}

/// Settings for [`crate::transaction::TransactionAssembler`].
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
	/// Protocol ceiling for a serialized transaction.
	pub max_transaction_len: usize,
	/// Bytes kept free below the ceiling.
	pub safety_margin: usize,
	/// Commitment requested for simulations.
	pub simulation_commitment: Commitment,
}

impl Default for AssemblerConfig {
	fn default() -> Self {
		Self {
			max_transaction_len: PACKET_DATA_SIZE,
			safety_margin: 32,
			simulation_commitment: Commitment::Processed,
		}
	}
}

impl AssemblerConfig {
	/// Largest serialized length a packed transaction may have.
	pub fn size_limit(&self) -> usize {
		self.max_transaction_len.saturating_sub(self.safety_margin)
	}
}
