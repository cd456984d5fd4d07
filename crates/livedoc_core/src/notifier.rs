//! Change notifier for observing document mutations.
//!
//! Every model owns one [`ChangeNotifier`]. The model's wrapped mutation
//! paths publish exactly one event per successful save, update or remove,
//! and live queries subscribe to re-evaluate themselves.
//!
//! # Usage
//!
//! ```rust,ignore
//! let id = model.notifier().subscribe(Arc::new(|event: &ChangeEvent| {
//!     println!("{:?} {}", event.kind, event.id);
//!     Ok(())
//! }));
//!
//! model.save(Document::new(fields))?; // handler runs before save returns
//!
//! model.notifier().unsubscribe(id);
//! ```

use crate::document::{Document, DocumentId};
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Kind of change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// First save of a new identity.
    Created,
    /// An existing document changed.
    Updated,
    /// A document was removed.
    Removed,
}

/// A single change event.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Per-notifier sequence number, assigned on publish.
    pub sequence: u64,
    /// Type of change.
    pub kind: ChangeKind,
    /// Affected document.
    pub id: DocumentId,
    /// Current document for created/updated. `None` for removed.
    pub document: Option<Document>,
}

impl ChangeEvent {
    /// Creates a created event.
    pub fn created(document: Document) -> Self {
        Self {
            sequence: 0,
            kind: ChangeKind::Created,
            id: document.id,
            document: Some(document),
        }
    }

    /// Creates an updated event.
    pub fn updated(document: Document) -> Self {
        Self {
            sequence: 0,
            kind: ChangeKind::Updated,
            id: document.id,
            document: Some(document),
        }
    }

    /// Creates a removed event.
    pub fn removed(id: DocumentId) -> Self {
        Self {
            sequence: 0,
            kind: ChangeKind::Removed,
            id,
            document: None,
        }
    }
}

/// Error a handler may report. It is logged and never propagated.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A subscribed change handler.
pub type ChangeHandler = Arc<dyn Fn(&ChangeEvent) -> Result<(), HandlerError> + Send + Sync>;

/// Identifies one subscription on one notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// A publish point that distributes change events to subscribers.
///
/// The notifier:
/// - Invokes handlers synchronously, in subscription order
/// - Isolates failing or panicking handlers
/// - Removes a handler before `unsubscribe` returns
/// - Is thread-safe
pub struct ChangeNotifier {
    /// Subscribers in subscription order.
    subscribers: RwLock<Vec<(SubscriptionId, ChangeHandler)>>,
    /// Next subscription id.
    next_id: AtomicU64,
    /// Last assigned event sequence.
    sequence: AtomicU64,
}

impl ChangeNotifier {
    /// Creates a notifier with no subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            sequence: AtomicU64::new(0),
        }
    }

    /// Subscribes a handler. It receives every event published afterwards.
    pub fn subscribe(&self, handler: ChangeHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push((id, handler));
        id
    }

    /// Removes a subscription.
    ///
    /// Idempotent: returns false if the id was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    /// Publishes an event to all current subscribers and returns its sequence.
    ///
    /// The subscriber list is snapshotted first and no lock is held while
    /// handlers run, so handlers may subscribe or unsubscribe freely.
    /// A subscriber removed after the snapshot may still be invoked for
    /// this one event; owners that need a hard cut-off must guard their
    /// own state (live queries do).
    pub fn publish(&self, mut event: ChangeEvent) -> u64 {
        event.sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;

        let snapshot: Vec<(SubscriptionId, ChangeHandler)> = self.subscribers.read().clone();
        for (id, handler) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(subscription = id.0, sequence = event.sequence, error = %err, "change handler failed");
                }
                Err(_) => {
                    warn!(subscription = id.0, sequence = event.sequence, "change handler panicked");
                }
            }
        }
        event.sequence
    }

    /// Returns the last assigned sequence number.
    pub fn latest_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("subscribers", &self.subscriber_count())
            .field("sequence", &self.latest_sequence())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Fields;
    use parking_lot::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<(u32, u64)>>>, tag: u32) -> ChangeHandler {
        let log = Arc::clone(log);
        Arc::new(move |event: &ChangeEvent| -> Result<(), HandlerError> {
            log.lock().push((tag, event.sequence));
            Ok(())
        })
    }

    #[test]
    fn publish_in_subscription_order() {
        let notifier = ChangeNotifier::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        notifier.subscribe(recorder(&log, 1));
        notifier.subscribe(recorder(&log, 2));

        let seq = notifier.publish(ChangeEvent::created(Document::new(Fields::new())));
        assert_eq!(seq, 1);
        assert_eq!(*log.lock(), vec![(1, 1), (2, 1)]);
    }

    #[test]
    fn unsubscribe_is_immediate_and_idempotent() {
        let notifier = ChangeNotifier::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let id = notifier.subscribe(recorder(&log, 1));

        assert!(notifier.unsubscribe(id));
        assert!(!notifier.unsubscribe(id));
        assert_eq!(notifier.subscriber_count(), 0);

        notifier.publish(ChangeEvent::removed(DocumentId::new()));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn failing_handlers_do_not_block_delivery() {
        let notifier = ChangeNotifier::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        notifier.subscribe(Arc::new(|_: &ChangeEvent| -> Result<(), HandlerError> {
            Err("boom".into())
        }));
        notifier.subscribe(Arc::new(|_: &ChangeEvent| -> Result<(), HandlerError> {
            panic!("handler bug")
        }));
        notifier.subscribe(recorder(&log, 3));

        notifier.publish(ChangeEvent::removed(DocumentId::new()));
        assert_eq!(*log.lock(), vec![(3, 1)]);
        assert_eq!(notifier.subscriber_count(), 3);
    }

    #[test]
    fn handler_may_unsubscribe_itself() {
        let notifier = Arc::new(ChangeNotifier::new());
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let count = Arc::new(AtomicU64::new(0));

        let handler: ChangeHandler = {
            let notifier = Arc::clone(&notifier);
            let slot = Arc::clone(&slot);
            let count = Arc::clone(&count);
            Arc::new(move |_: &ChangeEvent| -> Result<(), HandlerError> {
                count.fetch_add(1, Ordering::SeqCst);
                if let Some(id) = slot.lock().take() {
                    notifier.unsubscribe(id);
                }
                Ok(())
            })
        };
        *slot.lock() = Some(notifier.subscribe(handler));

        notifier.publish(ChangeEvent::removed(DocumentId::new()));
        notifier.publish(ChangeEvent::removed(DocumentId::new()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[test]
    fn sequence_is_monotonic() {
        let notifier = ChangeNotifier::new();
        assert_eq!(notifier.latest_sequence(), 0);
        for expected in 1..=5 {
            assert_eq!(notifier.publish(ChangeEvent::removed(DocumentId::new())), expected);
        }
        assert_eq!(notifier.latest_sequence(), 5);
    }
}
