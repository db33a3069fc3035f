//! Replay-latest streams of transaction logs, one channel per filter.

use crate::rpc::{LogsFilter, LogsNotification};
use futures::stream::{self, Stream, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::pin::Pin;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::debug;

/// Stream of logs notifications for one filter.
pub type LogStream = Pin<Box<dyn Stream<Item = LogsNotification> + Send>>;

struct Channel {
    latest: Option<LogsNotification>,
    sender: broadcast::Sender<LogsNotification>,
}

/// Latest logs notification per filter, fanned out to every open stream.
pub struct LogStore {
    channels: Mutex<HashMap<LogsFilter, Channel>>,
    capacity: usize,
}

impl LogStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    fn channel<'a>(
        channels: &'a mut HashMap<LogsFilter, Channel>,
        filter: LogsFilter,
        capacity: usize,
    ) -> &'a mut Channel {
        channels.entry(filter).or_insert_with(|| Channel {
            latest: None,
            sender: broadcast::channel(capacity.max(1)).0,
        })
    }

    /// Store `notification` as the latest for its filter and broadcast it.
    pub fn publish(&self, notification: LogsNotification) {
        let mut channels = self.channels.lock();
        let channel = Self::channel(&mut channels, notification.filter, self.capacity);
        channel.latest = Some(notification.clone());
        let _ = channel.sender.send(notification);
    }

    /// Stream yielding the latest notification (if any) followed by every later one.
    pub fn stream(&self, filter: LogsFilter) -> LogStream {
        let mut channels = self.channels.lock();
        let channel = Self::channel(&mut channels, filter, self.capacity);
        let replay = channel.latest.clone();
        let receiver = channel.sender.subscribe();
        drop(channels);

        let live = BroadcastStream::new(receiver).filter_map(move |item| async move {
            match item {
                Ok(notification) => Some(notification),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    debug!("Log stream for {} lagged, skipped {}", filter, skipped);
                    None
                }
            }
        });
        Box::pin(stream::iter(replay).chain(live))
    }

    pub fn latest(&self, filter: &LogsFilter) -> Option<LogsNotification> {
        self.channels
            .lock()
            .get(filter)
            .and_then(|channel| channel.latest.clone())
    }
}
