//! Account state cache with live-subscription multiplexing and batched resolution.

mod logs;
mod queue;
mod service;
mod store;

pub use logs::{LogStore, LogStream};
pub use queue::{ResolveQueue, SubscriptionPair, SubscriptionQueue};
pub use service::{AccountStateCache, SnapshotMapStream, StreamOptions};
pub use store::{AccountStore, IngestOutcome, SnapshotStream};
