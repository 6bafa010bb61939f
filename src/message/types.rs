//! Common types for [`Message`]s.

use serde::{Deserialize, Serialize};

use crate::token::{self, Token};

#[cfg(doc)]
use super::Message;

/// The unique identifier of a [`Message`], assigned once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(Token);

impl MessageId {
    /// Draw a new identifier from the process-wide sequence.
    pub(crate) fn generate() -> Self {
        Self(token::next_message_token())
    }

    /// The raw value of the identifier.
    pub fn value(&self) -> Token {
        self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "msg#{}", self.0)
    }
}

/// The unique identifier of one subscription of one receiver to one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscribeHandle(Token);

impl SubscribeHandle {
    pub(crate) fn generate() -> Self {
        Self(token::next_subscribe_token())
    }

    /// The raw value of the handle.
    pub fn value(&self) -> Token {
        self.0
    }
}

impl std::fmt::Display for SubscribeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// The type of an entity an [`Uid`](super::Uid) refers to.
///
/// Subscriptions filter on entity codes both for the sender and for the
/// entities a message refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityCode(pub u32);

impl std::fmt::Display for EntityCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An application defined code, distinguishing messages of the same type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageCode(pub i32);

/// The type of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// A reply confirming that a request was carried out.
    Confirm,

    /// A reply carrying an error.
    Error,

    /// A message without a defined structure. These are never shadowed onto
    /// the debug channel.
    General,

    /// A list of values.
    VariantList,

    /// Progress information.
    Progress,

    /// A single boolean.
    Bool,

    /// An application defined type.
    Custom(u32),
}

impl MessageType {
    /// Get the name of the type of message.
    pub fn name(&self) -> String {
        match self {
            Self::Confirm => "Confirm".to_owned(),
            Self::Error => "Error".to_owned(),
            Self::General => "General".to_owned(),
            Self::VariantList => "VariantList".to_owned(),
            Self::Progress => "Progress".to_owned(),
            Self::Bool => "Bool".to_owned(),
            Self::Custom(code) => format!("Custom({code})"),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name())
    }
}
