//! Generation of sequence tokens for messages and subscriptions.
//!
//! Tokens are drawn from process-wide counters, so they are never reused within
//! one run of the process.

use std::sync::atomic::{AtomicU64, Ordering};

/// A sequence token.
pub type Token = u64;

static MESSAGE_SEQUENCE: AtomicU64 = AtomicU64::new(1);

static SUBSCRIBE_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Generate the next message token.
pub fn next_message_token() -> Token {
    MESSAGE_SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// Generate the next subscription token.
pub fn next_subscribe_token() -> Token {
    SUBSCRIBE_SEQUENCE.fetch_add(1, Ordering::Relaxed)
}
