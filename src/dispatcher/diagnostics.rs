//! Read-only views of the bus state, for tracing tools and tests.
//!

use super::MessageBus;
use crate::{handler::ObjectKey, InboundMessageHandler};

/// Every reference the bus holds to one receiver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjectFootprint {
    pub registered: bool,

    /// Entries waiting in the buffer.
    pub buffered: usize,

    /// Entries in the delivery queue.
    pub queued: usize,

    /// Deliveries handed to the mailbox but not yet taken.
    pub mailbox: usize,

    pub subscriptions: usize,

    /// Delivered messages not yet confirmed.
    pub not_delivered: usize,
}

impl ObjectFootprint {
    /// Whether the bus holds no reference to the receiver at all.
    pub fn is_clear(&self) -> bool {
        *self == Self::default()
    }
}

impl MessageBus {
    /// Count the references the bus holds to `receiver`.
    pub fn object_footprint(&self, receiver: &dyn InboundMessageHandler) -> ObjectFootprint {
        let key = ObjectKey::of(receiver);
        let state = self.state();

        ObjectFootprint {
            registered: state.objects.contains_key(&key),
            buffered: state
                .buffer
                .iter()
                .filter(|entry| entry.receiver.key == key)
                .count(),
            queued: state
                .queue
                .iter()
                .filter(|entry| entry.receiver.key == key)
                .count(),
            mailbox: state
                .objects
                .get(&key)
                .map(|info| info.pending_deliveries())
                .unwrap_or_default(),
            subscriptions: state
                .subscriptions
                .values()
                .filter(|subscription| subscription.object.key == key)
                .count(),
            not_delivered: state
                .not_delivered
                .values()
                .filter(|receivers| receivers.contains(&key))
                .count(),
        }
    }

    /// The number of entries waiting in the buffer.
    pub fn buffered_len(&self) -> usize {
        self.state().buffer.len()
    }

    /// The number of (message, receiver) pairs not yet confirmed.
    pub fn not_delivered_len(&self) -> usize {
        self.state().not_delivered.values().map(Vec::len).sum()
    }
}
