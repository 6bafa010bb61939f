//! The capability every registered receiver implements.
//!

use std::sync::Arc;

use crate::{Message, MessageBus, SubscribeHandle, Uid};

/// A registered receiver, as handed to and returned by the [`MessageBus`].
pub type Receiver = Arc<dyn InboundMessageHandler>;

/// A receiver of messages routed by the [`MessageBus`].
///
/// Handlers are invoked on the receiver's own mailbox task, one message at a
/// time and in the order the bus delivered them. They run outside of every lock
/// of the bus, so they are free to post, subscribe or unregister. Handlers
/// should call [`MessageBus::confirm_message_delivery`] once they have
/// processed, or deliberately dropped, a message.
///
/// Handlers are plain functions; a handler that needs to wait on something
/// should spawn a task instead of blocking the runtime.
pub trait InboundMessageHandler: Send + Sync + 'static {
    /// Receive a message from `sender`.
    ///
    /// `subscribe_handle` is set only for messages received through a channel
    /// subscription.
    fn inbound_message(
        &self,
        bus: &MessageBus,
        sender: &Uid,
        message: &Message,
        subscribe_handle: Option<SubscribeHandle>,
    );

    /// Receive a message together with a live reference to the sending object.
    ///
    /// Only invoked for receivers registered with
    /// [`MessageBus::register_object_with_advanced`], right after
    /// [`Self::inbound_message`]. `sender` is [`None`] if the sender has been
    /// dropped in the meantime.
    #[allow(unused_variables)]
    fn inbound_message_advanced(
        &self,
        bus: &MessageBus,
        sender: Option<Receiver>,
        sender_uid: &Uid,
        message: &Message,
        subscribe_handle: Option<SubscribeHandle>,
    ) {
    }

    /// A name for this receiver, shown in debug traces.
    fn owner_name(&self) -> Option<String> {
        None
    }
}

/// The identity of a receiver object: the address of its allocation.
///
/// The bus never owns a receiver; it tracks it by this key and holds only a weak
/// reference to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ObjectKey(usize);

impl ObjectKey {
    pub(crate) fn of(object: &dyn InboundMessageHandler) -> Self {
        Self::from_address(object as *const dyn InboundMessageHandler as *const ())
    }

    /// The key of the object at `address`, for use where the object can no
    /// longer be borrowed as a handler, such as in its destructor.
    pub(crate) fn from_address(address: *const ()) -> Self {
        Self(address as usize)
    }
}
