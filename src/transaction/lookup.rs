//! Address lookup table fetching.

use super::builder::{TransactionAssembler, TransactionError};
use crate::key::AccountKey;
use itertools::Itertools;
use solana_sdk::address_lookup_table::AddressLookupTableAccount;
use solana_sdk::address_lookup_table::state::AddressLookupTable;
use tracing::{debug, warn};

impl TransactionAssembler {
	/// Fetch and decode address lookup tables in one batched lookup, for use with
	/// [`TransactionAssembler::pack`] and [`TransactionAssembler::simulate`].
	///
	/// Tables come back in request order with duplicates collapsed. Tables that do not exist
	/// or do not decode are skipped.
	pub async fn fetch_lookup_tables(
		&self,
		keys: &[AccountKey],
	) -> Result<Vec<AddressLookupTableAccount>, TransactionError> {
		let keys: Vec<AccountKey> = keys.iter().copied().unique().collect();
		if keys.is_empty() {
			return Ok(Vec::new());
		}

		let snapshots = self.client().get_multiple_accounts(&keys).await?;
		let tables: Vec<AddressLookupTableAccount> = keys
			.iter()
			.filter_map(|key| {
				let Some(data) = snapshots.get(key).and_then(|s| s.raw_data.as_deref()) else {
					debug!("Unable to resolve lookup table {}", key);
					return None;
				};
				decode_lookup_table(*key, data)
					.inspect_err(|e| warn!("{}", e))
					.ok()
			})
			.collect();

		debug!("Fetched {} of {} lookup tables", tables.len(), keys.len());
		Ok(tables)
	}
}

/// Decode a lookup table account's data.
pub fn decode_lookup_table(
	key: AccountKey,
	data: &[u8],
) -> Result<AddressLookupTableAccount, TransactionError> {
	let table = AddressLookupTable::deserialize(data).map_err(|e| TransactionError::LookupTable {
		key,
		reason: e.to_string(),
	})?;
	Ok(AddressLookupTableAccount {
		key: key.to_pubkey(),
		addresses: table.addresses.to_vec(),
	})
}

#[cfg(test)]
pub(crate) fn encode_lookup_table(addresses: &[solana_sdk::pubkey::Pubkey]) -> Vec<u8> {
	use solana_sdk::address_lookup_table::state::LookupTableMeta;
	use std::borrow::Cow;

	AddressLookupTable {
		meta: LookupTableMeta::default(),
		addresses: Cow::Borrowed(addresses),
	}
	.serialize_for_tests()
	.expect("Failed to encode lookup table")
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::blockhash::BlockhashPool;
	use crate::config::{AssemblerConfig, BlockhashPoolConfig};
	use crate::rpc::mock::{MockLedgerClient, snapshot};
	use solana_sdk::pubkey::Pubkey;
	use std::sync::Arc;

	#[tokio::test]
	async fn test_fetch_lookup_tables() {
		let client = Arc::new(MockLedgerClient::new("mock://a"));
		let pool = Arc::new(BlockhashPool::new(client.clone(), BlockhashPoolConfig::default()));
		let assembler = TransactionAssembler::new(client.clone(), pool, AssemblerConfig::default());

		let addresses = vec![Pubkey::new_unique(), Pubkey::new_unique()];
		let table = AccountKey::new([1; 32]);
		let garbage = AccountKey::new([2; 32]);
		let missing = AccountKey::new([3; 32]);
		client.set_account(snapshot(table, 9, &encode_lookup_table(&addresses)));
		client.set_account(snapshot(garbage, 9, &[1, 2, 3]));

		let tables = assembler
			.fetch_lookup_tables(&[missing, table, garbage, table])
			.await
			.expect("Failed to fetch lookup tables");

		assert_eq!(tables.len(), 1);
		assert_eq!(tables[0].key, table.to_pubkey());
		assert_eq!(tables[0].addresses, addresses);
		assert_eq!(client.state.lock().batch_calls, vec![vec![missing, table, garbage]]);
	}

	#[test]
	fn test_decode_rejects_short_data() {
		let key = AccountKey::new([4; 32]);
		assert!(matches!(
			decode_lookup_table(key, &[0u8; 8]),
			Err(TransactionError::LookupTable { .. })
		));
	}
}
