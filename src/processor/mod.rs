//! A keyed request tracker on top of the [`MessageBus`](crate::MessageBus).
//!
//! A [`MessageProcessor`] posts requests under caller-chosen keys, correlates
//! the replies through their feedback identifiers, and reports progress as
//! [`ProcessorEvent`]s.

mod events;
pub use events::*;

mod model;
pub use model::*;
