//! Best-effort state-change notifications.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::types::{ItemId, ItemStatus, ThreadId, ThreadStatus};

/// Default capacity of the notification channel.
pub const DEFAULT_CAPACITY: usize = 100;

/// A status transition of a post or thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StateChange {
    Item { id: ItemId, status: ItemStatus },
    Thread { id: ThreadId, status: ThreadStatus },
}

/// Publishes state changes without ever waiting on receivers.
///
/// A notifier without a channel, or whose receivers are all gone, silently
/// drops events.
#[derive(Debug, Clone, Default)]
pub struct EventNotifier {
    tx: Option<broadcast::Sender<StateChange>>,
}

impl EventNotifier {
    /// A notifier with a fresh channel of the given capacity.
    pub fn channel(capacity: usize) -> (Self, broadcast::Receiver<StateChange>) {
        let (tx, rx) = broadcast::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// A notifier that drops every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn subscribe(&self) -> Option<broadcast::Receiver<StateChange>> {
        self.tx.as_ref().map(broadcast::Sender::subscribe)
    }

    pub fn notify(&self, change: StateChange) {
        if let Some(tx) = &self.tx
            && tx.send(change).is_err()
        {
            trace!("no state-change subscribers");
        }
    }

    pub fn item(&self, id: ItemId, status: ItemStatus) {
        self.notify(StateChange::Item { id, status });
    }

    pub fn thread(&self, id: ThreadId, status: ThreadStatus) {
        self.notify(StateChange::Thread { id, status });
    }
}
