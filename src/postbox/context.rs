//! Bookkeeping for one outstanding synchronous call.

use fxhash::FxHashMap;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Mutex,
};
use tokio::sync::Notify;

use crate::{logger, Message, MessageId};

/// The identity of a caller of a synchronous send.
///
/// Inside a tokio task this is the task, otherwise the thread; at most one
/// synchronous call may be outstanding per caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum CallerKey {
    Task(tokio::task::Id),
    Thread(std::thread::ThreadId),
}

impl CallerKey {
    /// The key of the current caller.
    pub(crate) fn current() -> Self {
        tokio::task::try_id()
            .map(Self::Task)
            .unwrap_or_else(|| Self::Thread(std::thread::current().id()))
    }
}

/// A synchronous call waiting for the replies to its messages.
#[derive(Debug)]
pub(crate) struct SendContext {
    caller: CallerKey,
    order: Vec<MessageId>,
    slots: Mutex<FxHashMap<MessageId, Option<Message>>>,

    /// The number of distinct messages; a message sent twice is answered once.
    expected: usize,
    received: AtomicUsize,
    notify: Notify,

    /// Whether the messages and their replies bypass admission control.
    forced: bool,

    /// Set when the bus shuts down while the call is waiting.
    abandoned: AtomicBool,
}

impl SendContext {
    pub(crate) fn new(caller: CallerKey, order: Vec<MessageId>) -> Self {
        let slots = order
            .iter()
            .map(|id| (*id, None))
            .collect::<FxHashMap<_, _>>();
        let expected = slots.len();

        Self {
            caller,
            order,
            slots: Mutex::new(slots),
            expected,
            received: AtomicUsize::new(0),
            notify: Notify::new(),
            forced: false,
            abandoned: AtomicBool::new(false),
        }
    }

    pub(crate) fn with_force(mut self, forced: bool) -> Self {
        self.forced = forced;
        self
    }

    pub(crate) fn is_forced(&self) -> bool {
        self.forced
    }

    pub(crate) fn caller(&self) -> CallerKey {
        self.caller
    }

    /// The identifiers of the messages of this call, in the order they were sent.
    pub(crate) fn message_ids(&self) -> &[MessageId] {
        &self.order
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, FxHashMap<MessageId, Option<Message>>> {
        self.slots
            .lock()
            .unwrap_or_else(ignore_poison!(format!("reply slots of {:?}", self.caller)))
    }

    /// Capture `reply` into the slot of the message it answers.
    ///
    /// Only the first reply to each message is kept. Returns `true` if the reply
    /// was captured.
    pub(crate) fn capture(&self, reply: &Message) -> bool {
        let Some(feedback_id) = reply.feedback_id() else {
            return false;
        };

        let captured = match self.slots().get_mut(&feedback_id) {
            Some(slot) if slot.is_none() => {
                *slot = Some(reply.clone());
                true
            }
            Some(_) => {
                logger::debug!("Ignoring duplicate reply {} to {}.", reply.id(), feedback_id);
                false
            }
            None => false,
        };

        if captured && self.received.fetch_add(1, Ordering::AcqRel) + 1 == self.expected {
            // The permit is kept if the caller is not waiting yet.
            self.notify.notify_one();
        }

        captured
    }

    /// Whether every message of this call has been answered.
    pub(crate) fn is_complete(&self) -> bool {
        self.received.load(Ordering::Acquire) >= self.expected
    }

    /// Release the waiting caller without its replies.
    pub(crate) fn abandon(&self) {
        self.abandoned.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    fn is_settled(&self) -> bool {
        self.is_complete() || self.abandoned.load(Ordering::Acquire)
    }

    /// Wait for all replies, with an optional timeout.
    ///
    /// A timeout of [`None`] or zero waits forever. Returns `true` if every
    /// reply arrived, `false` on timeout or if the call was abandoned.
    pub(crate) async fn wait_for(&self, timeout: Option<tokio::time::Duration>) -> bool {
        let completion = async {
            while !self.is_settled() {
                self.notify.notified().await;
            }
        };

        match timeout.filter(|timeout| !timeout.is_zero()) {
            Some(timeout) => {
                tokio::select! {
                    _ = completion => {},
                    _ = tokio::time::sleep(timeout) => {},
                }
            }
            None => completion.await,
        }

        self.is_complete()
    }

    /// The replies in the order the messages were sent.
    ///
    /// Messages that were not answered get a synthesized timeout error.
    pub(crate) fn replies(&self) -> Vec<Message> {
        let slots = self.slots();

        self.order
            .iter()
            .map(|id| {
                slots
                    .get(id)
                    .cloned()
                    .flatten()
                    .unwrap_or_else(|| Message::timeout_error(*id))
            })
            .collect()
    }
}
