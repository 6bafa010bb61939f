//! Logical identities of message endpoints.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;

use super::EntityCode;

/// The logical identity of a message endpoint.
///
/// A [`Uid`] is not a single object: any number of receivers may be registered
/// under the same [`Uid`] at the same time, and a message posted to it reaches
/// all of them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Uid {
    code: EntityCode,
    key: Cow<'static, str>,
}

impl Uid {
    /// The core of the application; the default sender of anonymous channel posts
    /// in client code.
    pub const CORE: Uid = Uid::from_static(EntityCode(1), "core");

    /// The dispatcher itself. Synchronous calls arrive at their receivers from
    /// this identity, and their replies must be posted back to it.
    pub const MESSAGE_DISPATCHER: Uid = Uid::from_static(EntityCode(2), "message_dispatcher");

    /// The debug shell; receivers under this identity are never shadowed onto
    /// the debug channel.
    pub const SHELL_DEBUG: Uid = Uid::from_static(EntityCode(3), "shell_debug");

    /// Create a [`Uid`] from a static key.
    pub const fn from_static(code: EntityCode, key: &'static str) -> Self {
        Self {
            code,
            key: Cow::Borrowed(key),
        }
    }

    /// Create a [`Uid`] of the given entity type.
    pub fn new(code: EntityCode, key: impl Into<String>) -> Self {
        Self {
            code,
            key: Cow::Owned(key.into()),
        }
    }

    /// The type of the entity.
    pub fn entity_code(&self) -> EntityCode {
        self.code
    }

    /// The key of the entity within its type.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// A human readable form, used in traces.
    pub fn to_printable(&self) -> String {
        format!("{}:{}", self.code, self.key)
    }
}

impl std::fmt::Display for Uid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_printable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn borrowed_and_owned_keys_compare_equal() {
        let owned = Uid::new(EntityCode(2), "message_dispatcher");
        assert_eq!(owned, Uid::MESSAGE_DISPATCHER);

        let mut set = std::collections::HashSet::new();
        set.insert(Uid::MESSAGE_DISPATCHER);
        assert!(set.contains(&owned));
    }

    #[test]
    fn printable() {
        let uid = Uid::new(EntityCode(42), "invoice-7");
        assert_eq!(uid.to_printable(), "42:invoice-7");
        assert_eq!(uid.entity_code(), EntityCode(42));
        assert_eq!(uid.key(), "invoice-7");
    }
}
