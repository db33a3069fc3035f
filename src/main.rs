use futures::StreamExt;
use ledger_state_sync::blockhash::BlockhashPool;
use ledger_state_sync::cache::{AccountStateCache, StreamOptions};
use ledger_state_sync::config::{AssemblerConfig, BlockhashPoolConfig, CacheConfig, RpcConfig};
use ledger_state_sync::rpc::{LedgerClient, SolanaRpcClient};
use ledger_state_sync::transaction::{
	TransactionAssembler, compute_budget_instructions, memo_instruction,
};
use ledger_state_sync::AccountKey;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Account watched when `LEDGER_WATCH_ACCOUNTS` is unset (the USDC mint).
const DEFAULT_WATCH_ACCOUNT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
const UPDATES_TO_LOG: usize = 5;

#[tokio::main(flavor = "current_thread")]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,ledger_state_sync=debug")),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	let rpc_config = RpcConfig::from_env();
	info!("Starting ledger state sync against {}", rpc_config.rpc_url);

	let client: Arc<dyn LedgerClient> = match SolanaRpcClient::new(&rpc_config) {
		Ok(client) => Arc::new(client),
		Err(e) => {
			error!("Failed to create ledger client: {}", e);
			return;
		}
	};

	let watched = std::env::var("LEDGER_WATCH_ACCOUNTS")
		.unwrap_or_else(|_| DEFAULT_WATCH_ACCOUNT.to_string());
	let keys: Vec<AccountKey> = match watched
		.split(',')
		.map(|s| s.trim().parse::<AccountKey>())
		.collect()
	{
		Ok(keys) => keys,
		Err(e) => {
			error!("Invalid account in LEDGER_WATCH_ACCOUNTS: {}", e);
			return;
		}
	};

	let cache = AccountStateCache::new(client.clone(), CacheConfig::default());
	cache.start();

	let pool = Arc::new(BlockhashPool::new(client.clone(), BlockhashPoolConfig::default()));
	pool.set_loop_state(true);

	let mut updates = cache.stream_for_many(
		&keys,
		StreamOptions::default().with_poll_interval(Duration::from_secs(30)),
	);
	for _ in 0..UPDATES_TO_LOG {
		match tokio::time::timeout(Duration::from_secs(60), updates.next()).await {
			Ok(Some(snapshots)) => {
				for snapshot in snapshots.values() {
					info!(
						"{} @ slot {}: {} lamports, {} bytes",
						snapshot.key.short(),
						snapshot.slot,
						snapshot.lamports,
						snapshot.raw_data.as_ref().map_or(0, Vec::len)
					);
				}
			}
			Ok(None) => break,
			Err(_) => {
				warn!("No account update within 60s");
				break;
			}
		}
	}

	let assembler = TransactionAssembler::new(client.clone(), pool.clone(), AssemblerConfig::default());
	let payer = keys[0].to_pubkey();
	let mut instructions = compute_budget_instructions(20_000, 1);
	instructions.push(memo_instruction("ledger-state-sync", &[]));
	match assembler.assemble(&payer, instructions, &[], None).await {
		Ok(packed) => info!(
			"Assembled transaction of {} bytes with blockhash {} (valid until height {})",
			packed.serialized_len,
			packed.validity_token.blockhash,
			packed.validity_token.last_valid_block_height
		),
		Err(e) => error!("Failed to assemble transaction: {}", e),
	}
	info!("{} validity tokens pooled", pool.token_count());

	pool.set_loop_state(false);
	cache.stop();
}
