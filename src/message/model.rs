use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::{EntityCode, MessageCode, MessageId, MessageType, Uid};
use crate::{CourierError, ErrorKind};

/// The immutable payload unit exchanged over the bus.
///
/// Every message receives a unique [`MessageId`] when it is constructed. Cloning
/// a message does not change its identifier: a clone is the same message, which
/// is what the bus relies on when it buffers copies for several receivers.
///
/// The `entities` of a message list the [`Uid`]s its payload refers to; channel
/// subscriptions filter on them.
///
/// A deserialized message is a new message: it draws a fresh identifier, and
/// any identifier in the input is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "MessageData")]
pub struct Message {
    id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    feedback_id: Option<MessageId>,
    message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code: Option<MessageCode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    entities: Vec<Uid>,
    #[serde(default)]
    body: serde_json::Value,
}

/// Everything of a [`Message`] but its identifier.
#[derive(Deserialize)]
struct MessageData {
    #[serde(default)]
    feedback_id: Option<MessageId>,
    message_type: MessageType,
    #[serde(default)]
    code: Option<MessageCode>,
    #[serde(default)]
    entities: Vec<Uid>,
    #[serde(default)]
    body: serde_json::Value,
}

impl From<MessageData> for Message {
    fn from(data: MessageData) -> Self {
        Self {
            feedback_id: data.feedback_id,
            code: data.code,
            entities: data.entities,
            body: data.body,
            ..Self::new(data.message_type)
        }
    }
}

/// The body of a [`MessageType::Error`] message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub text: String,
}

impl Message {
    /// Create a new message of the given type with an empty body.
    pub fn new(message_type: MessageType) -> Self {
        Self {
            id: MessageId::generate(),
            feedback_id: None,
            message_type,
            code: None,
            entities: Vec::new(),
            body: serde_json::Value::Null,
        }
    }

    /// Create a reply to `request`, correlated through its feedback identifier.
    pub fn reply_to(request: &Message, message_type: MessageType) -> Self {
        Self::new(message_type).with_feedback_id(request.id())
    }

    /// A reply confirming that the request `feedback_id` was carried out.
    pub fn confirm(feedback_id: MessageId) -> Self {
        Self::new(MessageType::Confirm).with_feedback_id(feedback_id)
    }

    /// An error reply to the request `feedback_id`.
    pub fn error(feedback_id: MessageId, kind: ErrorKind, text: impl Into<String>) -> Self {
        let body = ErrorBody {
            kind,
            text: text.into(),
        };

        Self::new(MessageType::Error)
            .with_feedback_id(feedback_id)
            .with_body(serde_json::to_value(body).unwrap_or_default())
    }

    /// The reply synthesized when a synchronous call to `feedback_id` times out.
    pub fn timeout_error(feedback_id: MessageId) -> Self {
        Self::error(
            feedback_id,
            ErrorKind::Timeout,
            format!("Timed out waiting for a reply to {feedback_id}."),
        )
    }

    /// Set the identifier of the message this one replies to.
    pub fn with_feedback_id(mut self, feedback_id: MessageId) -> Self {
        self.feedback_id = Some(feedback_id);
        self
    }

    /// Set the application defined code.
    pub fn with_code(mut self, code: MessageCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Add an entity the payload refers to.
    pub fn with_entity(mut self, uid: Uid) -> Self {
        self.entities.push(uid);
        self
    }

    /// Add entities the payload refers to.
    pub fn with_entities(mut self, uids: impl IntoIterator<Item = Uid>) -> Self {
        self.entities.extend(uids);
        self
    }

    /// Set the body.
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = body;
        self
    }

    /// Set the body by serializing `body`.
    pub fn with_serializable_body<T: Serialize>(self, body: &T) -> Result<Self, CourierError> {
        Ok(self.with_body(serde_json::to_value(body)?))
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn feedback_id(&self) -> Option<MessageId> {
        self.feedback_id
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn code(&self) -> Option<MessageCode> {
        self.code
    }

    pub fn entities(&self) -> &[Uid] {
        &self.entities
    }

    pub fn body(&self) -> &serde_json::Value {
        &self.body
    }

    /// Deserialize the body into `T`.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T, CourierError> {
        Ok(serde_json::from_value(self.body.clone())?)
    }

    /// Whether the payload refers to an entity of the given type.
    pub fn contains_type(&self, code: EntityCode) -> bool {
        self.entities.iter().any(|uid| uid.entity_code() == code)
    }

    /// Whether the payload refers to the given entity.
    pub fn contains_uid(&self, uid: &Uid) -> bool {
        self.entities.contains(uid)
    }

    /// Whether the payload refers to an entity of any of the given types.
    pub fn contains_any_type(&self, codes: &[EntityCode]) -> bool {
        codes.iter().any(|code| self.contains_type(*code))
    }

    /// Whether the payload refers to any of the given entities.
    pub fn contains_any_uid(&self, uids: &[Uid]) -> bool {
        uids.iter().any(|uid| self.contains_uid(uid))
    }

    pub fn is_error(&self) -> bool {
        self.message_type == MessageType::Error
    }

    /// The [`ErrorBody`] of an error reply.
    ///
    /// Returns [`None`] if this is not an error or its body is malformed.
    pub fn error_body(&self) -> Option<ErrorBody> {
        if !self.is_error() {
            return None;
        }

        serde_json::from_value(self.body.clone()).ok()
    }

    pub fn is_timeout_error(&self) -> bool {
        self.error_body()
            .map(|body| body.kind == ErrorKind::Timeout)
            .unwrap_or(false)
    }

    /// A one-line human readable form, used in traces and on the debug channel.
    pub fn to_printable(&self, show_type: bool, show_id: bool) -> String {
        let mut parts = Vec::with_capacity(5);

        if show_type {
            parts.push(self.message_type.name());
        }
        if show_id {
            parts.push(self.id.to_string());
            if let Some(feedback_id) = self.feedback_id {
                parts.push(format!("re {feedback_id}"));
            }
        }
        if let Some(code) = self.code {
            parts.push(format!("code {}", code.0));
        }
        if !self.entities.is_empty() {
            parts.push(format!(
                "[{}]",
                self.entities
                    .iter()
                    .map(Uid::to_printable)
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        if !self.body.is_null() {
            parts.push(self.body.to_string());
        }

        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_keeps_identity() {
        let message = Message::new(MessageType::General);
        let other = Message::new(MessageType::General);

        assert_eq!(message.clone().id(), message.id());
        assert_ne!(message.id(), other.id());
    }

    #[test]
    fn reply_correlates() {
        let request = Message::new(MessageType::Custom(1));
        let reply = Message::reply_to(&request, MessageType::Custom(2));

        assert_eq!(reply.feedback_id(), Some(request.id()));
        assert_ne!(reply.id(), request.id());
    }

    #[test]
    fn timeout_error_body() {
        let request = Message::new(MessageType::Custom(1));
        let reply = Message::timeout_error(request.id());

        assert!(reply.is_error());
        assert!(reply.is_timeout_error());
        assert_eq!(reply.feedback_id(), Some(request.id()));

        let confirm = Message::confirm(request.id());
        assert!(!confirm.is_timeout_error());
        assert_eq!(confirm.error_body(), None);
    }

    #[test]
    fn contains_entities() {
        let a = Uid::new(EntityCode(10), "a");
        let b = Uid::new(EntityCode(11), "b");
        let message = Message::new(MessageType::General).with_entity(a.clone());

        assert!(message.contains_uid(&a));
        assert!(!message.contains_uid(&b));
        assert!(message.contains_type(EntityCode(10)));
        assert!(message.contains_any_type(&[EntityCode(11), EntityCode(10)]));
        assert!(!message.contains_any_uid(&[b]));
    }

    #[test]
    fn deserialized_message_is_new() {
        let request = Message::new(MessageType::Custom(1));
        let reply = Message::reply_to(&request, MessageType::Custom(2))
            .with_code(MessageCode(4))
            .with_entity(Uid::new(EntityCode(10), "a"))
            .with_body(serde_json::json!({ "count": 3 }));

        let json = serde_json::to_string(&reply).expect("Failed to serialize message.");
        let copy: Message = serde_json::from_str(&json).expect("Failed to deserialize message.");

        assert_ne!(copy.id(), reply.id());
        assert_eq!(copy.feedback_id(), Some(request.id()));
        assert_eq!(copy.message_type(), reply.message_type());
        assert_eq!(copy.code(), reply.code());
        assert_eq!(copy.entities(), reply.entities());
        assert_eq!(copy.body(), reply.body());

        let again: Message = serde_json::from_str(&json).expect("Failed to deserialize message.");
        assert_ne!(again.id(), copy.id());
    }

    #[test]
    fn serializable_body() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Payload {
            count: u32,
        }

        let message = Message::new(MessageType::Custom(9))
            .with_serializable_body(&Payload { count: 3 })
            .expect("Failed to serialize body.");

        let payload: Payload = message.body_as().expect("Failed to deserialize body.");
        assert_eq!(payload, Payload { count: 3 });
        assert!(message.to_printable(true, false).starts_with("Custom(9)"));
    }
}
