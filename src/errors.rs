//! Error types.
//!

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CourierError {
    #[error("Contract violation: {0}")]
    ContractViolation(String),
    #[error("The message bus has not been bootstrapped.")]
    NotBootstrapped,
    #[error("The message bus has been shut down.")]
    ShutDown,
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),
    #[error("Receiver is not registered: {0}")]
    ReceiverNotRegistered(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl CourierError {
    /// The [`ErrorKind`] to report when this error is carried inside a [`Message`].
    ///
    /// [`Message`]: crate::Message
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ContractViolation(_) => ErrorKind::ContractViolation,
            Self::ReceiverNotRegistered(_) => ErrorKind::NotRegistered,
            _ => ErrorKind::Custom,
        }
    }
}

/// The kind of an error reply, as carried in the body of a
/// [`MessageType::Error`](crate::MessageType::Error) message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No reply arrived before the synchronous call timed out.
    Timeout,
    ContractViolation,
    NotRegistered,
    Custom,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Timeout => "timeout",
            Self::ContractViolation => "contract violation",
            Self::NotRegistered => "not registered",
            Self::Custom => "custom",
        };
        f.write_str(name)
    }
}
