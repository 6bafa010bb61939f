//! Broadcast channels.

use serde::{Deserialize, Serialize};

/// A named broadcast channel.
///
/// Channels below [`MessageChannel::MIN_USER_CHANNEL`] are reserved and are
/// registered by [`MessageBus::bootstrap`](crate::MessageBus::bootstrap).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageChannel(u32);

impl MessageChannel {
    /// The first channel number available to applications.
    pub const MIN_USER_CHANNEL: u32 = 500;

    /// General exchange between modules.
    pub const GENERAL: MessageChannel = MessageChannel(1);
    /// Entities were changed.
    pub const ENTITY_CHANGED: MessageChannel = MessageChannel(20);
    /// Entities were removed.
    pub const ENTITY_REMOVED: MessageChannel = MessageChannel(21);
    /// Entities were created.
    pub const ENTITY_CREATED: MessageChannel = MessageChannel(22);
    /// Informational text from a server.
    pub const SERVER_INFORMATION: MessageChannel = MessageChannel(23);
    /// State of the connection to a server.
    pub const CONNECTION_INFORMATION: MessageChannel = MessageChannel(24);
    /// Models report that their data became invalid.
    pub const MODEL_INVALIDATE: MessageChannel = MessageChannel(30);
    /// Internal traffic of the core.
    pub const INTERNAL: MessageChannel = MessageChannel(40);
    /// Shadow copies of routed messages, for tracing tools.
    pub const MESSAGE_DEBUG: MessageChannel = MessageChannel(50);

    /// All reserved channels.
    pub const RESERVED: [MessageChannel; 9] = [
        Self::GENERAL,
        Self::ENTITY_CHANGED,
        Self::ENTITY_REMOVED,
        Self::ENTITY_CREATED,
        Self::SERVER_INFORMATION,
        Self::CONNECTION_INFORMATION,
        Self::MODEL_INVALIDATE,
        Self::INTERNAL,
        Self::MESSAGE_DEBUG,
    ];

    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// The channel number.
    pub const fn id(&self) -> u32 {
        self.0
    }

    /// Whether this is one of the [reserved](Self::RESERVED) channels.
    pub fn is_reserved(&self) -> bool {
        Self::RESERVED.contains(self)
    }
}

impl std::fmt::Display for MessageChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "channel#{}", self.0)
    }
}
