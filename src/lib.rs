//! Client-side ledger state synchronization.
//!
//! - [`cache::AccountStateCache`]: latest-known account snapshots with multiplexed live
//!   subscriptions, batched background resolution and shared transaction log streams
//! - [`blockhash::BlockhashPool`]: rolling pool of validity tokens
//! - [`transaction::TransactionAssembler`]: size-bounded transaction packing, simulation with
//!   balance deltas, lookup table fetching and submission
//!
//! All three talk to the ledger through the [`rpc::LedgerClient`] trait.

pub mod blockhash;
pub mod cache;
pub mod config;
pub mod key;
pub mod rpc;
pub mod transaction;

pub use key::{AccountKey, ParseKeyError};
