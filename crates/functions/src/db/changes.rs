//! Change notifications for committed writes.
//!
//! Every successful transaction or batch publishes one [`ChangeEvent`] per
//! write. Subscribers see events in commit order. A subscriber that falls
//! behind by more than the channel capacity skips the oldest events and
//! logs a warning.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::warn;

use zone_editor_core::{CollectionPath, DocumentPath};

/// Events buffered per subscriber before it starts lagging.
const CHANNEL_CAPACITY: usize = 1024;

/// What happened to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// A committed change to one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub path: DocumentPath,
}

impl ChangeEvent {
    #[must_use]
    pub const fn new(kind: ChangeKind, path: DocumentPath) -> Self {
        Self { kind, path }
    }
}

/// Broadcast hub for [`ChangeEvent`]s.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<ChangeEvent>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publish events. Having no subscribers is not an error.
    pub fn publish(&self, events: impl IntoIterator<Item = ChangeEvent>) {
        for event in events {
            // Err only means nobody is listening.
            let _ = self.sender.send(event);
        }
    }

    /// Subscribe to changes of documents directly inside `collection`.
    ///
    /// The subscription ends when the returned value is dropped.
    #[must_use]
    pub fn subscribe(&self, collection: CollectionPath) -> ChangeSubscription {
        ChangeSubscription {
            collection: Some(collection),
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to every change in the store.
    #[must_use]
    pub fn subscribe_all(&self) -> ChangeSubscription {
        ChangeSubscription {
            collection: None,
            receiver: self.sender.subscribe(),
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// A live subscription to a [`ChangeFeed`].
#[derive(Debug)]
pub struct ChangeSubscription {
    collection: Option<CollectionPath>,
    receiver: broadcast::Receiver<ChangeEvent>,
}

impl ChangeSubscription {
    /// Wait for the next matching event.
    ///
    /// Returns `None` once the feed has been dropped.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, collection = ?self.collection, "Change subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Return a matching event if one is already queued.
    pub fn try_next(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, collection = ?self.collection, "Change subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }

    /// End the subscription.
    pub fn cancel(self) {}

    fn matches(&self, event: &ChangeEvent) -> bool {
        self.collection
            .as_ref()
            .is_none_or(|collection| event.path.parent() == *collection)
    }
}
