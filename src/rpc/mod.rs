//! Remote ledger access: the [`LedgerClient`] capability and its JSON-RPC implementation.

mod client;
mod ledger;
mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use client::SolanaRpcClient;
pub use ledger::LedgerClient;
pub use types::*;
