//! Canonical account key.
//!
//! Every external representation of an account address (raw bytes, a `Pubkey`, or a base58
//! string) is converted into [`AccountKey`] through an explicit, fallible conversion. All
//! internal maps, queues and comparisons use this type only.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use solana_sdk::pubkey::Pubkey;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length in bytes of an account address.
pub const ACCOUNT_KEY_LEN: usize = 32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseKeyError {
	#[error("invalid key length: expected {ACCOUNT_KEY_LEN} bytes, got {0}")]
	InvalidLength(usize),

	#[error("invalid base58 key string: {0}")]
	InvalidBase58(String),
}

/// Fixed-length account identifier. Immutable once constructed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct AccountKey([u8; ACCOUNT_KEY_LEN]);

impl AccountKey {
	pub const fn new(bytes: [u8; ACCOUNT_KEY_LEN]) -> Self {
		Self(bytes)
	}

	pub fn from_bytes(bytes: &[u8]) -> Result<Self, ParseKeyError> {
		let array: [u8; ACCOUNT_KEY_LEN] = bytes
			.try_into()
			.map_err(|_| ParseKeyError::InvalidLength(bytes.len()))?;
		Ok(Self(array))
	}

	pub fn as_bytes(&self) -> &[u8; ACCOUNT_KEY_LEN] {
		&self.0
	}

	/// Canonical base58 string, the same encoding the ledger uses on the wire.
	pub fn to_base58(&self) -> String {
		bs58::encode(self.0).into_string()
	}

	/// Shortened form for log lines, e.g. `9xQe...VFin`.
	pub fn short(&self) -> String {
		let full = self.to_base58();
		if full.len() < 11 {
			return full;
		}
		format!("{}...{}", &full[..4], &full[full.len() - 4..])
	}

	pub fn to_pubkey(&self) -> Pubkey {
		Pubkey::new_from_array(self.0)
	}
}

impl FromStr for AccountKey {
	type Err = ParseKeyError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let bytes = bs58::decode(s)
			.into_vec()
			.map_err(|e| ParseKeyError::InvalidBase58(e.to_string()))?;
		Self::from_bytes(&bytes)
	}
}

impl TryFrom<&[u8]> for AccountKey {
	type Error = ParseKeyError;

	fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
		Self::from_bytes(value)
	}
}

impl TryFrom<&str> for AccountKey {
	type Error = ParseKeyError;

	fn try_from(value: &str) -> Result<Self, Self::Error> {
		value.parse()
	}
}

impl From<Pubkey> for AccountKey {
	fn from(value: Pubkey) -> Self {
		Self(value.to_bytes())
	}
}

impl From<&Pubkey> for AccountKey {
	fn from(value: &Pubkey) -> Self {
		Self(value.to_bytes())
	}
}

impl From<AccountKey> for Pubkey {
	fn from(value: AccountKey) -> Self {
		value.to_pubkey()
	}
}

impl fmt::Display for AccountKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_base58())
	}
}

impl fmt::Debug for AccountKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "AccountKey({})", self.to_base58())
	}
}

impl Serialize for AccountKey {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.to_base58())
	}
}

impl<'de> Deserialize<'de> for AccountKey {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(serde::de::Error::custom)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_string_round_trip() {
		for seed in [0u8, 1, 7, 128, 255] {
			let key = AccountKey::new([seed; ACCOUNT_KEY_LEN]);
			let encoded = key.to_string();
			let decoded: AccountKey = encoded.parse().expect("Failed to parse encoded key");
			assert_eq!(decoded, key);
		}
	}

	#[test]
	fn test_matches_pubkey_encoding() {
		let pubkey = Pubkey::new_unique();
		let key = AccountKey::from(pubkey);
		assert_eq!(key.to_string(), pubkey.to_string());
		assert_eq!(Pubkey::from(key), pubkey);
	}

	#[test]
	fn test_rejects_wrong_length() {
		assert_eq!(
			AccountKey::from_bytes(&[1, 2, 3]),
			Err(ParseKeyError::InvalidLength(3))
		);
		// valid base58, but only a handful of bytes
		assert!(matches!(
			"abc".parse::<AccountKey>(),
			Err(ParseKeyError::InvalidLength(_))
		));
		assert!(matches!(
			"0OIl".parse::<AccountKey>(),
			Err(ParseKeyError::InvalidBase58(_))
		));
	}

	#[test]
	fn test_serde_as_string() {
		let key = AccountKey::new([9; ACCOUNT_KEY_LEN]);
		let json = serde_json::to_string(&key).expect("Failed to serialize key");
		assert_eq!(json, format!("\"{}\"", key));
		let back: AccountKey = serde_json::from_str(&json).expect("Failed to deserialize key");
		assert_eq!(back, key);
	}
}
