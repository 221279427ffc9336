//! Change feed of committed writes.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;
use tracing::trace;

use syncstack_dynamodb_model::Item;

/// Capacity of the change feed; slow receivers observe `Lagged`.
const CHANGE_FEED_CAPACITY: usize = 1024;

/// One committed item write.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Table the item belongs to.
    pub table_name: String,
    /// Item before the write; `None` for inserts.
    pub old_item: Option<Item>,
    /// Item after the write; `None` for deletes.
    pub new_item: Option<Item>,
    /// Service-wide commit sequence.
    pub sequence: u64,
}

impl ChangeEvent {
    /// `INSERT`, `MODIFY` or `REMOVE`.
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        match (&self.old_item, &self.new_item) {
            (None, _) => "INSERT",
            (Some(_), Some(_)) => "MODIFY",
            (Some(_), None) => "REMOVE",
        }
    }
}

/// Sequencer and broadcaster for [`ChangeEvent`]s.
#[derive(Debug)]
pub struct ChangeFeed {
    sender: broadcast::Sender<ChangeEvent>,
    sequence: AtomicU64,
}

impl ChangeFeed {
    /// Creates a feed without receivers.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            sender,
            sequence: AtomicU64::new(0),
        }
    }

    /// Builds an event with the next sequence number. Must be called while the
    /// table lock is held so sequences follow commit order.
    pub fn record(&self, table_name: &str, old_item: Option<Item>, new_item: Option<Item>) -> ChangeEvent {
        ChangeEvent {
            table_name: table_name.to_owned(),
            old_item,
            new_item,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
        }
    }

    /// Broadcasts events to current receivers. Having no receiver is fine.
    pub fn publish(&self, events: Vec<ChangeEvent>) {
        for event in events {
            trace!(table = %event.table_name, sequence = event.sequence, kind = event.event_name(), "change published");
            let _ = self.sender.send(event);
        }
    }

    /// New receiver for events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}
