use crate::Message;

/// Progress of the requests of a [`MessageProcessor`](super::MessageProcessor).
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessorEvent<K> {
    /// A request was queued under a key that had no queued request yet.
    RequestAdded(K),

    /// The key went from idle to having a queued or pending request.
    StartWaiting(K),

    /// The reply to the pending request of `key` arrived.
    Feedback {
        key: K,
        request: Message,
        feedback: Message,
    },

    FinishWaiting(K),

    /// The key no longer has a queued or pending request.
    RequestRemoved(K),
}

impl<K> ProcessorEvent<K> {
    /// The key this event is about.
    pub fn key(&self) -> &K {
        match self {
            Self::RequestAdded(key)
            | Self::StartWaiting(key)
            | Self::FinishWaiting(key)
            | Self::RequestRemoved(key) => key,
            Self::Feedback { key, .. } => key,
        }
    }
}
