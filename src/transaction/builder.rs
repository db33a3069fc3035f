//! Transaction assembler
//!
//! This module builds versioned (v0) transactions from instructions and a validity token taken
//! from the [`BlockhashPool`], packs instruction groups into size-bounded transactions and
//! submits raw transactions.

use super::packer::pack_groups;
use crate::blockhash::{BlockhashPool, ValidityToken};
use crate::config::AssemblerConfig;
use crate::key::AccountKey;
use crate::rpc::{LedgerClient, RpcError, SendOptions};
use solana_sdk::address_lookup_table::AddressLookupTableAccount;
use solana_sdk::compute_budget::ComputeBudgetInstruction;
use solana_sdk::hash::Hash;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::message::{VersionedMessage, v0};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

/// Program id of the SPL memo program.
pub const MEMO_PROGRAM_ID: Pubkey = solana_sdk::pubkey!("MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr");

#[derive(Error, Debug)]
pub enum TransactionError {
	#[error("Instruction group {index} does not fit in a transaction: {reason}")]
	GroupTooLarge { index: usize, reason: String },

	#[error("Transaction of {len} bytes exceeds the {limit} byte limit")]
	TooLarge { len: usize, limit: usize },

	#[error("Failed to compile message: {0}")]
	Compile(String),

	#[error("Failed to encode transaction: {0}")]
	Encode(String),

	#[error("No validity token available")]
	NoValidityToken,

	#[error("Invalid lookup table {key}: {reason}")]
	LookupTable { key: AccountKey, reason: String },

	#[error("Ledger error: {0}")]
	Rpc(#[from] RpcError),
}

/// A compiled, unsigned transaction ready for signing or simulation.
#[derive(Debug, Clone)]
pub struct PackedTransaction {
	pub fee_payer: Pubkey,
	pub instructions: Vec<Instruction>,
	pub validity_token: ValidityToken,
	pub lookup_tables: Vec<AddressLookupTableAccount>,
	/// Carries default signatures, one per required signer.
	pub transaction: VersionedTransaction,
	pub serialized_len: usize,
}

/// Builds transactions against a validity token pool.
pub struct TransactionAssembler {
	client: Arc<dyn LedgerClient>,
	pool: Arc<BlockhashPool>,
	config: AssemblerConfig,
}

impl TransactionAssembler {
	pub fn new(
		client: Arc<dyn LedgerClient>,
		pool: Arc<BlockhashPool>,
		config: AssemblerConfig,
	) -> Self {
		Self {
			client,
			pool,
			config,
		}
	}

	pub fn config(&self) -> &AssemblerConfig {
		&self.config
	}

	pub(crate) fn client(&self) -> &Arc<dyn LedgerClient> {
		&self.client
	}

	/// Build one transaction from `instructions`. The caller is responsible for its size.
	/// Without an explicit token, the pool's newest token is used.
	pub async fn assemble(
		&self,
		fee_payer: &Pubkey,
		instructions: Vec<Instruction>,
		lookup_tables: &[AddressLookupTableAccount],
		token: Option<ValidityToken>,
	) -> Result<PackedTransaction, TransactionError> {
		let token = self.resolve_token(token).await?;
		let (transaction, serialized_len) =
			compile_transaction(fee_payer, &instructions, lookup_tables, token.blockhash)?;

		Ok(PackedTransaction {
			fee_payer: *fee_payer,
			instructions,
			validity_token: token,
			lookup_tables: lookup_tables.to_vec(),
			transaction,
			serialized_len,
		})
	}

	/// Pack instruction groups into as few transactions as greedy order allows, each within
	/// the configured size limit. Groups are never split and keep their order.
	///
	/// # Errors
	/// Returns `TransactionError::GroupTooLarge` if a single group cannot fit on its own.
	pub async fn pack(
		&self,
		fee_payer: &Pubkey,
		groups: Vec<Vec<Instruction>>,
		lookup_tables: &[AddressLookupTableAccount],
		token: Option<ValidityToken>,
	) -> Result<Vec<PackedTransaction>, TransactionError> {
		let token = self.resolve_token(token).await?;
		let limit = self.config.size_limit();

		let batches = pack_groups(&groups, limit, |instructions| {
			compile_transaction(fee_payer, instructions, lookup_tables, token.blockhash)
		})?;

		info!(
			"Packed {} instruction groups into {} transactions",
			groups.len(),
			batches.len()
		);

		Ok(batches
			.into_iter()
			.map(|batch| PackedTransaction {
				fee_payer: *fee_payer,
				instructions: groups[batch.groups].iter().flatten().cloned().collect(),
				validity_token: token,
				lookup_tables: lookup_tables.to_vec(),
				transaction: batch.compiled,
				serialized_len: batch.serialized_len,
			})
			.collect())
	}

	/// Serialized length of a transaction carrying `instructions`, for callers sizing their
	/// own batches.
	pub fn serialized_len(
		&self,
		fee_payer: &Pubkey,
		instructions: &[Instruction],
		lookup_tables: &[AddressLookupTableAccount],
	) -> Result<usize, TransactionError> {
		let (_, len) = compile_transaction(fee_payer, instructions, lookup_tables, Hash::default())?;
		Ok(len)
	}

	/// Whether a transaction of `len` bytes stays within the configured limit.
	pub fn fits(&self, len: usize) -> bool {
		len <= self.config.size_limit()
	}

	/// Submit an already signed transaction. Failures are logged and yield `None`.
	pub async fn send_transaction(
		&self,
		transaction: &VersionedTransaction,
		options: SendOptions,
	) -> Option<Signature> {
		let bytes = match bincode::serialize(transaction) {
			Ok(bytes) => bytes,
			Err(e) => {
				error!("Failed to encode transaction: {}", e);
				return None;
			}
		};
		if !self.fits(bytes.len()) {
			debug!(
				"Sending {} byte transaction above the packing limit of {}",
				bytes.len(),
				self.config.size_limit()
			);
		}

		match self.client.send_raw_transaction(&bytes, options).await {
			Ok(signature) => {
				info!("Submitted transaction {}", signature);
				Some(signature)
			}
			Err(e) => {
				error!("Failed to submit transaction: {}", e);
				None
			}
		}
	}

	async fn resolve_token(
		&self,
		token: Option<ValidityToken>,
	) -> Result<ValidityToken, TransactionError> {
		match token {
			Some(token) => Ok(token),
			None => self.pool.peek().await.ok_or(TransactionError::NoValidityToken),
		}
	}
}

/// Compile a v0 transaction with default signatures and measure its wire length.
pub fn compile_transaction(
	fee_payer: &Pubkey,
	instructions: &[Instruction],
	lookup_tables: &[AddressLookupTableAccount],
	blockhash: Hash,
) -> Result<(VersionedTransaction, usize), TransactionError> {
	let message = v0::Message::try_compile(fee_payer, instructions, lookup_tables, blockhash)
		.map_err(|e| TransactionError::Compile(e.to_string()))?;
	let transaction = VersionedTransaction {
		signatures: vec![Signature::default(); usize::from(message.header.num_required_signatures)],
		message: VersionedMessage::V0(message),
	};
	let len = bincode::serialize(&transaction)
		.map_err(|e| TransactionError::Encode(e.to_string()))?
		.len();
	Ok((transaction, len))
}

/// Compute unit limit and price instructions, to be placed first in a transaction.
pub fn compute_budget_instructions(units: u32, micro_lamports: u64) -> Vec<Instruction> {
	vec![
		ComputeBudgetInstruction::set_compute_unit_limit(units),
		ComputeBudgetInstruction::set_compute_unit_price(micro_lamports),
	]
}

/// Memo instruction; every listed signer must sign the transaction.
pub fn memo_instruction(text: &str, signers: &[Pubkey]) -> Instruction {
	Instruction {
		program_id: MEMO_PROGRAM_ID,
		accounts: signers
			.iter()
			.map(|signer| AccountMeta::new_readonly(*signer, true))
			.collect(),
		data: text.as_bytes().to_vec(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::BlockhashPoolConfig;
	use crate::rpc::mock::MockLedgerClient;
	use solana_sdk::packet::PACKET_DATA_SIZE;

	fn setup() -> (Arc<MockLedgerClient>, TransactionAssembler) {
		let client = Arc::new(MockLedgerClient::new("mock://a"));
		client.push_blockhash(1, 10, 1000);
		let pool = Arc::new(BlockhashPool::new(
			client.clone(),
			BlockhashPoolConfig::default(),
		));
		let assembler = TransactionAssembler::new(client.clone(), pool, AssemblerConfig::default());
		(client, assembler)
	}

	fn data_instruction(program_id: Pubkey, writable: Pubkey, len: usize) -> Instruction {
		Instruction {
			program_id,
			accounts: vec![AccountMeta::new(writable, false)],
			data: vec![7u8; len],
		}
	}

	#[tokio::test]
	async fn test_assemble_uses_pool_token() {
		let (_client, assembler) = setup();
		let payer = Pubkey::new_unique();
		let program = Pubkey::new_unique();

		let packed = assembler
			.assemble(
				&payer,
				vec![data_instruction(program, Pubkey::new_unique(), 10)],
				&[],
				None,
			)
			.await
			.expect("Failed to assemble");

		assert_eq!(packed.validity_token.blockhash, Hash::new_from_array([1; 32]));
		assert_eq!(
			*packed.transaction.message.recent_blockhash(),
			packed.validity_token.blockhash
		);
		assert_eq!(packed.transaction.message.static_account_keys()[0], payer);
		assert_eq!(packed.transaction.signatures.len(), 1);
		assert_eq!(
			packed.serialized_len,
			bincode::serialize(&packed.transaction).map(|b| b.len()).unwrap_or(0)
		);
	}

	#[tokio::test]
	async fn test_pack_splits_by_size() {
		let (_client, assembler) = setup();
		let payer = Pubkey::new_unique();
		let program = Pubkey::new_unique();
		let target = Pubkey::new_unique();
		let groups: Vec<Vec<Instruction>> = (0..3)
			.map(|_| vec![data_instruction(program, target, 450)])
			.collect();

		let packed = assembler
			.pack(&payer, groups, &[], None)
			.await
			.expect("Failed to pack");

		assert_eq!(packed.len(), 2);
		assert_eq!(packed[0].instructions.len(), 2);
		assert_eq!(packed[1].instructions.len(), 1);
		for tx in &packed {
			assert!(tx.serialized_len <= PACKET_DATA_SIZE - 32);
		}
	}

	#[tokio::test]
	async fn test_pack_with_lookup_table_fits_more_groups() {
		let (_client, assembler) = setup();
		let payer = Pubkey::new_unique();
		let program = Pubkey::new_unique();
		let groups: Vec<Vec<Instruction>> = (0..4)
			.map(|_| {
				vec![Instruction {
					program_id: program,
					accounts: (0..10)
						.map(|_| AccountMeta::new(Pubkey::new_unique(), false))
						.collect(),
					data: vec![7u8; 20],
				}]
			})
			.collect();
		let table = AddressLookupTableAccount {
			key: Pubkey::new_unique(),
			addresses: groups
				.iter()
				.flatten()
				.flat_map(|ix| ix.accounts.iter().map(|meta| meta.pubkey))
				.collect(),
		};

		let plain = assembler
			.pack(&payer, groups.clone(), &[], None)
			.await
			.expect("Failed to pack");
		let compressed = assembler
			.pack(&payer, groups, &[table.clone()], None)
			.await
			.expect("Failed to pack");

		assert_eq!(plain.len(), 2);
		assert_eq!(compressed.len(), 1);
		assert_eq!(compressed[0].instructions.len(), 4);
		assert_eq!(compressed[0].lookup_tables[0].key, table.key);
		let lookups = compressed[0]
			.transaction
			.message
			.address_table_lookups()
			.expect("Message should be v0");
		assert_eq!(lookups.len(), 1);
		assert_eq!(lookups[0].writable_indexes.len(), 40);
		assert!(compressed[0].serialized_len < plain[0].serialized_len);
	}

	#[tokio::test]
	async fn test_pack_rejects_oversized_group() {
		let (_client, assembler) = setup();
		let payer = Pubkey::new_unique();
		let program = Pubkey::new_unique();
		let groups = vec![
			vec![data_instruction(program, Pubkey::new_unique(), 50)],
			vec![data_instruction(program, Pubkey::new_unique(), 1300)],
		];

		let result = assembler.pack(&payer, groups, &[], None).await;
		assert!(matches!(
			result,
			Err(TransactionError::GroupTooLarge { index: 1, .. })
		));
	}

	#[tokio::test]
	async fn test_no_token_is_an_error() {
		let client = Arc::new(MockLedgerClient::new("mock://a"));
		let pool = Arc::new(BlockhashPool::new(
			client.clone(),
			BlockhashPoolConfig::default(),
		));
		let assembler = TransactionAssembler::new(client, pool, AssemblerConfig::default());

		let result = assembler
			.assemble(&Pubkey::new_unique(), Vec::new(), &[], None)
			.await;
		assert!(matches!(result, Err(TransactionError::NoValidityToken)));
	}

	#[tokio::test]
	async fn test_send_transaction() {
		let (client, assembler) = setup();
		let packed = assembler
			.assemble(
				&Pubkey::new_unique(),
				compute_budget_instructions(200_000, 1_000),
				&[],
				None,
			)
			.await
			.expect("Failed to assemble");

		let signature = assembler
			.send_transaction(&packed.transaction, SendOptions::default())
			.await;
		assert_eq!(signature, Some(Signature::default()));
		assert_eq!(client.state.lock().sent.len(), 1);
		assert_eq!(client.state.lock().sent[0].len(), packed.serialized_len);
	}

	#[test]
	fn test_memo_instruction() {
		let signer = Pubkey::new_unique();
		let memo = memo_instruction("hello", &[signer]);
		assert_eq!(memo.program_id, MEMO_PROGRAM_ID);
		assert_eq!(memo.data, b"hello");
		assert!(memo.accounts[0].is_signer);
		assert!(!memo.accounts[0].is_writable);
	}

	#[tokio::test]
	async fn test_serialized_len_grows_with_data() {
		let (_client, assembler) = setup();
		let payer = Pubkey::new_unique();
		let program = Pubkey::new_unique();
		let target = Pubkey::new_unique();

		let small = assembler
			.serialized_len(&payer, &[data_instruction(program, target, 10)], &[])
			.expect("Failed to measure");
		let large = assembler
			.serialized_len(&payer, &[data_instruction(program, target, 110)], &[])
			.expect("Failed to measure");
		assert_eq!(large - small, 100);
	}
}
