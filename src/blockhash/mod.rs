//! Validity token pool.

mod pool;

pub use pool::{BlockhashPool, ValidityToken};
