//! The postbox that tracks outstanding synchronous calls and routes their replies.
//!
use fxhash::FxHashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{CallerKey, SendContext};
use crate::{logger, CourierError, Message, MessageId};

#[derive(Debug, Default)]
struct PostBoxTables {
    by_caller: FxHashMap<CallerKey, Arc<SendContext>>,
    by_message: FxHashMap<MessageId, Arc<SendContext>>,
}

/// The postbox that receives replies and hands them to the waiting caller.
#[derive(Debug, Default)]
pub(crate) struct PostBox {
    tables: Mutex<PostBoxTables>,
}

impl PostBox {
    /// Create a new postbox, and return the atomic reference to it.
    pub(crate) fn new_arc() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn tables(&self) -> MutexGuard<'_, PostBoxTables> {
        self.tables.lock().unwrap_or_else(ignore_poison!("postbox tables"))
    }

    /// Open a [`SendContext`] for `caller`, expecting replies to `message_ids`.
    ///
    /// A caller can only have one outstanding synchronous call; a second one is
    /// a [`CourierError::ContractViolation`].
    pub(crate) fn open(
        &self,
        caller: CallerKey,
        message_ids: Vec<MessageId>,
        forced: bool,
    ) -> Result<Arc<SendContext>, CourierError> {
        let mut tables = self.tables();

        if tables.by_caller.contains_key(&caller) {
            return Err(CourierError::ContractViolation(format!(
                "{caller:?} already has a synchronous call in flight; \
                nested synchronous sends are not allowed."
            )));
        }

        if let Some(id) = message_ids
            .iter()
            .find(|id| tables.by_message.contains_key(*id))
        {
            return Err(CourierError::ContractViolation(format!(
                "Message {id} is already awaiting a reply in another synchronous call."
            )));
        }

        let context = Arc::new(SendContext::new(caller, message_ids).with_force(forced));
        tables.by_caller.insert(caller, Arc::clone(&context));
        for id in context.message_ids() {
            tables.by_message.insert(*id, Arc::clone(&context));
        }
        logger::trace!(
            "Opened send context for {:?} with {} message(s).",
            caller,
            context.message_ids().len()
        );

        Ok(context)
    }

    /// Remove `context` from every lookup table.
    pub(crate) fn close(&self, context: &SendContext) {
        let mut tables = self.tables();

        tables.by_caller.remove(&context.caller());
        for id in context.message_ids() {
            tables.by_message.remove(id);
        }
        logger::trace!("Closed send context for {:?}.", context.caller());
    }

    /// Route `reply` to the call waiting for it.
    ///
    /// Returns `true` if a waiting call captured the reply.
    pub(crate) fn resolve(&self, reply: &Message) -> bool {
        let context = reply
            .feedback_id()
            .and_then(|feedback_id| self.tables().by_message.get(&feedback_id).cloned());

        context
            .map(|context| context.capture(reply))
            .unwrap_or(false)
    }

    /// Whether `reply` answers a forced call, and so should skip admission control.
    pub(crate) fn awaits_forced_reply(&self, reply: &Message) -> bool {
        reply.feedback_id().is_some_and(|feedback_id| {
            self.tables()
                .by_message
                .get(&feedback_id)
                .is_some_and(|context| context.is_forced())
        })
    }

    /// Release every waiting call; their missing replies become timeouts.
    pub(crate) fn abandon_all(&self) {
        for context in self.tables().by_caller.values() {
            context.abandon();
        }
    }

    /// Get the number of outstanding synchronous calls.
    pub(crate) fn len(&self) -> usize {
        self.tables().by_caller.len()
    }

    /// Check if no synchronous call is outstanding.
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Closes a [`SendContext`] when dropped, so that a cancelled or finished call
/// never leaves an entry behind.
pub(crate) struct SendGuard<'p> {
    postbox: &'p PostBox,
    context: Arc<SendContext>,
}

impl<'p> SendGuard<'p> {
    pub(crate) fn new(postbox: &'p PostBox, context: Arc<SendContext>) -> Self {
        Self { postbox, context }
    }

    pub(crate) fn context(&self) -> &SendContext {
        &self.context
    }
}

impl Drop for SendGuard<'_> {
    fn drop(&mut self) {
        self.postbox.close(&self.context);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::MessageType;

    #[test]
    fn nested_open_is_rejected() {
        let postbox = PostBox::new_arc();
        let caller = CallerKey::current();

        let first = postbox
            .open(caller, vec![Message::new(MessageType::General).id()], false)
            .expect("Failed to open the first context.");

        let nested = postbox.open(caller, vec![Message::new(MessageType::General).id()], false);
        assert!(matches!(nested, Err(CourierError::ContractViolation(_))));

        postbox.close(&first);
        assert!(postbox.is_empty());
    }

    #[test]
    fn resolve_routes_by_feedback_id() {
        let postbox = PostBox::new_arc();
        let request = Message::new(MessageType::Custom(7));

        let context = postbox
            .open(CallerKey::current(), vec![request.id()], true)
            .expect("Failed to open context.");
        let guard = SendGuard::new(&postbox, context);

        assert!(postbox.awaits_forced_reply(&Message::confirm(request.id())));
        assert!(!postbox.resolve(&Message::new(MessageType::Confirm)));
        assert!(postbox.resolve(&Message::confirm(request.id())));
        assert!(guard.context().is_complete());

        drop(guard);
        assert!(postbox.is_empty());
        assert!(!postbox.resolve(&Message::confirm(request.id())));
    }
}
