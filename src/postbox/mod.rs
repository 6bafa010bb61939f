//! A postbox is a staging area where replies to synchronous calls are collected.
//! Assume task A wants to send a message to receiver B, and expects a reply in
//! response. Since messages are delivered asynchronously, task A needs to await
//! the reply without holding on to anything inside the bus. The postbox keeps a
//! [`SendContext`] per outstanding call, captures every reply correlated to one
//! of its messages, and notifies the waiting caller once all of them arrived.
//!

mod context;
pub(crate) use context::*;

mod model;
pub(crate) use model::*;
