//! The message model: identities, channels and the immutable [`Message`] payload unit.
//!

mod channel;
pub use channel::*;

mod model;
pub use model::*;

mod types;
pub use types::*;

mod uid;
pub use uid::*;
