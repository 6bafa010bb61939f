//! Teardown of the message bus.
//!
//! This defines all the teardown logic for the bus, run explicitly through
//! [`MessageBus::shutdown`] or when the last reference is dropped.

use std::sync::atomic::Ordering;

use super::MessageBus;
use crate::logger;

impl MessageBus {
    /// Shut the bus down.
    ///
    /// Stops the flush task and every mailbox, discards all buffered and queued
    /// messages, and releases waiting synchronous calls, whose missing replies
    /// become timeouts. Afterwards nothing can be registered or posted.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        self.terminate_flag.notify_one();
        if !self.postbox.is_empty() {
            logger::warn!("Releasing {} waiting synchronous call(s).", self.postbox.len());
        }
        self.postbox.abandon_all();

        // Dropped outside of the lock.
        let state = std::mem::take(&mut *self.state());

        for info in state.objects.values() {
            info.mailbox.terminate();
        }

        logger::info!(
            "Message bus shut down with {} registered object(s) and {} buffered message(s).",
            state.objects.len(),
            state.buffer.len()
        );
        drop(state);
    }

    /// Whether [`Self::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

impl Drop for MessageBus {
    fn drop(&mut self) {
        self.shutdown();
    }
}
