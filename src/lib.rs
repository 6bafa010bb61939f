//! Courier library.
//!
//! A process-local, typed and filtered message bus. Endpoints register under a
//! logical [`Uid`], exchange [`Message`]s point-to-point or through broadcast
//! [`MessageChannel`]s, and can wait for correlated replies with
//! [`MessageBus::send_message`].
//!

#[macro_use]
mod macros;

mod config;
pub use config::*;

#[cfg(feature = "example")]
pub mod example;

mod errors;
pub use errors::{CourierError, ErrorKind};

mod handler;
pub use handler::*;

mod message;
pub use message::*;

mod dispatcher;
pub use dispatcher::*;

mod postbox;

mod processor;
pub use processor::*;

pub mod token;


/// Re-export the [`logger`] module.
pub use logger;
