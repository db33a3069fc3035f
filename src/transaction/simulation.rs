//! Simulation and balance diffing.
//!
//! `simulate` reads the pre-execution token balances of every writable account (including
//! accounts pulled in through address lookup tables), runs the transaction through the
//! ledger's simulator and diffs the returned post-execution buffers. Buffers that are missing
//! or not a token account are recorded as skips, never as errors.

use super::builder::{TransactionAssembler, TransactionError};
use super::token_layout::{Skipped, TokenAccountBalance, decode_token_account};
use crate::key::AccountKey;
use crate::rpc::{SimulateOptions, UiAccount};
use itertools::Itertools;
use serde::Deserialize;
use serde_json::Value;
use solana_sdk::address_lookup_table::AddressLookupTableAccount;
use solana_sdk::transaction::VersionedTransaction;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Change in a token account's balance across one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceDelta {
	pub account_key: AccountKey,
	pub mint: AccountKey,
	pub owner: AccountKey,
	pub pre: u64,
	pub post: u64,
	pub diff: i128,
}

impl BalanceDelta {
	pub fn new(account_key: AccountKey, mint: AccountKey, owner: AccountKey, pre: u64, post: u64) -> Self {
		Self {
			account_key,
			mint,
			owner,
			pre,
			post,
			diff: i128::from(post) - i128::from(pre),
		}
	}
}

/// Error code extracted from a failed simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulationErrorCode {
	/// A built-in fault such as `InvalidAccountData`.
	Named(String),
	/// A program-defined `Custom` code.
	Custom(u32),
}

/// Simulation-level failure reported by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationFailure {
	/// Index of the failing instruction, when the fault is an instruction error.
	pub instruction_index: Option<u8>,
	pub code: SimulationErrorCode,
	pub raw: Value,
}

/// Which side of the diff an account was skipped on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceStage {
	Pre,
	Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedAccount {
	pub account_key: AccountKey,
	pub stage: BalanceStage,
	pub reason: Skipped,
}

/// Result of [`TransactionAssembler::simulate`].
#[derive(Debug, Clone, Default)]
pub struct SimulationOutcome {
	pub failure: Option<SimulationFailure>,
	pub logs: Vec<String>,
	pub units_consumed: Option<u64>,
	pub writable_accounts: Vec<AccountKey>,
	/// One entry per writable account whose pre and post state both decoded.
	pub balance_deltas: HashMap<AccountKey, BalanceDelta>,
	pub skipped: Vec<SkippedAccount>,
}

impl SimulationOutcome {
	pub fn is_success(&self) -> bool {
		self.failure.is_none()
	}
}

impl TransactionAssembler {
	/// Simulate `transaction` and, when `include_balances` is set, diff the token balances of
	/// its writable accounts.
	///
	/// Ledger faults are returned in [`SimulationOutcome::failure`]; only transport failures
	/// are errors.
	pub async fn simulate(
		&self,
		transaction: &VersionedTransaction,
		lookup_tables: &[AddressLookupTableAccount],
		include_balances: bool,
	) -> Result<SimulationOutcome, TransactionError> {
		let writable = if include_balances {
			writable_accounts(transaction, lookup_tables)
		} else {
			Vec::new()
		};

		let mut outcome = SimulationOutcome {
			writable_accounts: writable.clone(),
			..SimulationOutcome::default()
		};

		let mut pre = HashMap::with_capacity(writable.len());
		if !writable.is_empty() {
			let snapshots = self.client().get_multiple_accounts(&writable).await?;
			for key in &writable {
				let data = snapshots.get(key).and_then(|s| s.raw_data.as_deref());
				match decode_token_account(data) {
					Ok(balance) => {
						pre.insert(*key, balance);
					}
					Err(reason) => outcome.skipped.push(SkippedAccount {
						account_key: *key,
						stage: BalanceStage::Pre,
						reason,
					}),
				}
			}
		}

		let options = SimulateOptions {
			sig_verify: false,
			replace_recent_blockhash: true,
			commitment: Some(self.config().simulation_commitment),
			account_addresses: writable.clone(),
		};
		let response = self.client().simulate_transaction(transaction, options).await?;

		outcome.logs = response.logs.unwrap_or_default();
		outcome.units_consumed = response.units_consumed;
		if let Some(err) = response.err.filter(|e| !e.is_null()) {
			let failure = simulation_failure(err);
			warn!("Simulation failed: {:?}", failure.code);
			outcome.failure = Some(failure);
		}

		if include_balances {
			let post_accounts = response.accounts.unwrap_or_default();
			let (deltas, skipped) = diff_balances(&writable, &pre, &post_accounts);
			outcome.balance_deltas = deltas;
			outcome.skipped.extend(skipped);
			debug!(
				"Simulation produced {} balance deltas, {} skipped accounts",
				outcome.balance_deltas.len(),
				outcome.skipped.len()
			);
		}

		Ok(outcome)
	}
}

/// Writable accounts of `transaction`: static keys first, then lookup-table addresses.
/// Lookups against a table missing from `lookup_tables` are ignored.
pub fn writable_accounts(
	transaction: &VersionedTransaction,
	lookup_tables: &[AddressLookupTableAccount],
) -> Vec<AccountKey> {
	let header = transaction.message.header();
	let keys = transaction.message.static_account_keys();
	let signed = usize::from(header.num_required_signatures);
	let writable_signed = signed.saturating_sub(usize::from(header.num_readonly_signed_accounts));
	let writable_unsigned_end = keys
		.len()
		.saturating_sub(usize::from(header.num_readonly_unsigned_accounts));

	let mut writable: Vec<AccountKey> = keys
		.iter()
		.enumerate()
		.filter(|(i, _)| *i < writable_signed || (*i >= signed && *i < writable_unsigned_end))
		.map(|(_, key)| AccountKey::from(key))
		.collect();

	for lookup in transaction.message.address_table_lookups().unwrap_or_default() {
		let Some(table) = lookup_tables.iter().find(|t| t.key == lookup.account_key) else {
			debug!("Lookup table {} not supplied", lookup.account_key);
			continue;
		};
		writable.extend(
			lookup
				.writable_indexes
				.iter()
				.filter_map(|index| table.addresses.get(usize::from(*index)))
				.map(AccountKey::from),
		);
	}

	writable.into_iter().unique().collect()
}

/// Pair decoded pre balances with post buffers, positionally matched to `writable`.
pub fn diff_balances(
	writable: &[AccountKey],
	pre: &HashMap<AccountKey, TokenAccountBalance>,
	post_accounts: &[Option<UiAccount>],
) -> (HashMap<AccountKey, BalanceDelta>, Vec<SkippedAccount>) {
	let mut deltas = HashMap::new();
	let mut skipped = Vec::new();

	for (index, key) in writable.iter().enumerate() {
		let post = match post_accounts.get(index).and_then(Option::as_ref) {
			Some(account) => account
				.decode_data()
				.map_err(|e| Skipped::Malformed(e.to_string()))
				.and_then(|data| decode_token_account(Some(&data))),
			None => Err(Skipped::Missing),
		};
		let post = match post {
			Ok(post) => post,
			Err(reason) => {
				skipped.push(SkippedAccount {
					account_key: *key,
					stage: BalanceStage::Post,
					reason,
				});
				continue;
			}
		};
		let Some(pre) = pre.get(key) else {
			continue;
		};
		deltas.insert(
			*key,
			BalanceDelta::new(*key, post.mint, post.owner, pre.amount, post.amount),
		);
	}

	(deltas, skipped)
}

/// Extract the error code from a ledger error such as
/// `{"InstructionError":[0,{"Custom":6001}]}` or `{"InstructionError":[1,"InvalidAccountData"]}`.
pub fn simulation_failure(raw: Value) -> SimulationFailure {
	let instruction_error = raw.get("InstructionError").and_then(Value::as_array);
	let (instruction_index, code) = match instruction_error {
		Some(parts) => {
			let index = parts
				.first()
				.and_then(Value::as_u64)
				.and_then(|i| u8::try_from(i).ok());
			(index, error_code(parts.get(1).unwrap_or(&Value::Null)))
		}
		None => (None, error_code(&raw)),
	};
	SimulationFailure {
		instruction_index,
		code,
		raw,
	}
}

fn error_code(detail: &Value) -> SimulationErrorCode {
	if let Some(name) = detail.as_str() {
		return SimulationErrorCode::Named(name.to_string());
	}
	if let Some(code) = detail
		.get("Custom")
		.and_then(Value::as_u64)
		.and_then(|c| u32::try_from(c).ok())
	{
		return SimulationErrorCode::Custom(code);
	}
	match detail.as_object().and_then(|o| o.keys().next()) {
		Some(name) => SimulationErrorCode::Named(name.clone()),
		None => SimulationErrorCode::Named(detail.to_string()),
	}
}

/// Token balance entry from an executed transaction's metadata.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
	pub account_index: usize,
	pub mint: AccountKey,
	#[serde(default)]
	pub owner: Option<AccountKey>,
	pub ui_token_amount: TokenAmount,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenAmount {
	/// Raw amount as a decimal string.
	pub amount: String,
	#[serde(default)]
	pub decimals: u8,
}

/// Balance deltas from an executed transaction's pre and post token balances.
///
/// An account present on only one side was created or closed by the transaction and counts
/// as zero on the other. With `skip_zero`, unchanged balances are left out.
pub fn token_changes_from_executed(
	account_keys: &[AccountKey],
	pre_balances: &[TokenBalance],
	post_balances: &[TokenBalance],
	skip_zero: bool,
) -> Vec<BalanceDelta> {
	let amount = |balance: &TokenBalance| balance.ui_token_amount.amount.parse::<u64>().ok();
	let pre: HashMap<usize, &TokenBalance> =
		pre_balances.iter().map(|b| (b.account_index, b)).collect();
	let post: HashMap<usize, &TokenBalance> =
		post_balances.iter().map(|b| (b.account_index, b)).collect();

	pre.keys()
		.chain(post.keys())
		.copied()
		.unique()
		.sorted()
		.filter_map(|index| {
			let Some(account_key) = account_keys.get(index) else {
				warn!("Token balance refers to missing account index {}", index);
				return None;
			};
			let before = pre.get(&index).copied();
			let after = post.get(&index).copied();
			let reference = after.or(before)?;
			let pre_amount = before.map_or(Some(0), amount)?;
			let post_amount = after.map_or(Some(0), amount)?;
			Some(BalanceDelta::new(
				*account_key,
				reference.mint,
				reference.owner.unwrap_or_default(),
				pre_amount,
				post_amount,
			))
		})
		.filter(|delta| !skip_zero || delta.diff != 0)
		.collect()
}
