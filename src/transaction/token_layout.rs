//! Byte layout of an SPL token account.

use crate::key::AccountKey;

/// SPL token account length; buffers of any other length are not decoded.
pub const TOKEN_ACCOUNT_LEN: usize = 165;

/// Mint offset range `[0..32]`.
pub const MINT_OFFSET: usize = 0;
/// Owner offset range `[32..64]`.
pub const OWNER_OFFSET: usize = 32;
/// Amount offset range `[64..72]`, little-endian u64.
pub const AMOUNT_OFFSET: usize = 64;
const KEY_LEN: usize = 32;
const AMOUNT_LEN: usize = 8;

/// Decoded balance fields of a token account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenAccountBalance {
	pub mint: AccountKey,
	pub owner: AccountKey,
	pub amount: u64,
}

/// Why an account buffer was not decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Skipped {
	#[error("account data missing")]
	Missing,

	#[error("unexpected account length {0}")]
	WrongLength(usize),

	#[error("malformed account data: {0}")]
	Malformed(String),
}

/// Decode a token account buffer. Anything that is not exactly one token account is skipped.
pub fn decode_token_account(data: Option<&[u8]>) -> Result<TokenAccountBalance, Skipped> {
	let data = data.ok_or(Skipped::Missing)?;
	if data.len() != TOKEN_ACCOUNT_LEN {
		return Err(Skipped::WrongLength(data.len()));
	}

	let key_at = |offset: usize| {
		AccountKey::from_bytes(&data[offset..offset + KEY_LEN])
			.map_err(|e| Skipped::Malformed(e.to_string()))
	};
	let amount: [u8; AMOUNT_LEN] = data[AMOUNT_OFFSET..AMOUNT_OFFSET + AMOUNT_LEN]
		.try_into()
		.map_err(|_| Skipped::Malformed("amount".to_string()))?;

	Ok(TokenAccountBalance {
		mint: key_at(MINT_OFFSET)?,
		owner: key_at(OWNER_OFFSET)?,
		amount: u64::from_le_bytes(amount),
	})
}

#[cfg(test)]
pub(crate) fn encode_token_account(mint: AccountKey, owner: AccountKey, amount: u64) -> Vec<u8> {
	let mut data = vec![0u8; TOKEN_ACCOUNT_LEN];
	data[MINT_OFFSET..MINT_OFFSET + KEY_LEN].copy_from_slice(mint.as_bytes());
	data[OWNER_OFFSET..OWNER_OFFSET + KEY_LEN].copy_from_slice(owner.as_bytes());
	data[AMOUNT_OFFSET..AMOUNT_OFFSET + AMOUNT_LEN].copy_from_slice(&amount.to_le_bytes());
	// initialized
	data[108] = 1;
	data
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_decode_token_account() {
		let mint = AccountKey::new([1; 32]);
		let owner = AccountKey::new([2; 32]);
		let data = encode_token_account(mint, owner, 1_500_000);

		let balance = decode_token_account(Some(&data)).expect("Failed to decode");
		assert_eq!(balance.mint, mint);
		assert_eq!(balance.owner, owner);
		assert_eq!(balance.amount, 1_500_000);
	}

	#[test]
	fn test_skips_other_buffers() {
		assert_eq!(decode_token_account(None), Err(Skipped::Missing));
		assert_eq!(
			decode_token_account(Some(&[0u8; 82])),
			Err(Skipped::WrongLength(82))
		);
		assert_eq!(
			decode_token_account(Some(&[0u8; 170])),
			Err(Skipped::WrongLength(170))
		);
	}
}
