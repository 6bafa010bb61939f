//! The message bus.
//!
//! A [`MessageBus`] binds receivers to logical [`Uid`](crate::Uid)s, keeps the
//! directory of broadcast channels, and moves every posted message through a
//! two stage pipeline:
//!
//! 1. Posting resolves the receivers (directly by uid or object, or through the
//!    subscriptions of a channel) and appends one entry per receiver to the
//!    *buffer*, then arms the flush task.
//! 2. The flush task promotes up to [`BusConfig::one_step`](crate::BusConfig)
//!    admitted entries into the *delivery queue*, and drains the whole queue into
//!    the mailboxes of the receivers.
//!
//! Receivers are invoked on their own mailbox task, so anything they post while
//! handling a message lands back in the buffer instead of re-entering delivery.
//!
//! The synchronous layer ([`MessageBus::send_messages`]) posts on behalf of an
//! internal reply collector and waits for the correlated replies.

mod model;
pub use model::*;

mod admission;
mod buffer;

mod channels;
pub use channels::SubscribeFilter;

mod delivery;

mod diagnostics;
pub use diagnostics::ObjectFootprint;

mod drop;
mod registry;
mod sync;
