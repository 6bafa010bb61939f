//! Structs and receivers that are only useful in the demo binary.
//!
//!
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{
    logger, EntityCode, InboundMessageHandler, Message, MessageBus, MessageType, SubscribeHandle,
    Uid,
};

pub const PING: MessageType = MessageType::Custom(1);
pub const PONG: MessageType = MessageType::Custom(2);

/// The uid the [`Responder`] registers under.
pub const RESPONDER: Uid = Uid::from_static(EntityCode(500), "responder");

/// The uid the [`Tracer`] registers under.
pub const TRACER: Uid = Uid::SHELL_DEBUG;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PingBody {
    pub sequence: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PongBody {
    pub sequence: u32,
    pub served: u64,
}

/// Answers every [`PING`] with a [`PONG`] echoing its sequence number.
#[derive(Debug, Default)]
pub struct Responder {
    served: AtomicU64,
}

impl InboundMessageHandler for Responder {
    fn inbound_message(
        &self,
        bus: &MessageBus,
        sender: &Uid,
        message: &Message,
        _subscribe_handle: Option<SubscribeHandle>,
    ) {
        bus.confirm_message_delivery(message, self);

        if message.message_type() != PING {
            return;
        }

        let reply = message
            .body_as::<PingBody>()
            .and_then(|ping| {
                Message::reply_to(message, PONG).with_serializable_body(&PongBody {
                    sequence: ping.sequence,
                    served: self.served.fetch_add(1, Ordering::Relaxed) + 1,
                })
            })
            .unwrap_or_else(|err| {
                Message::error(message.id(), err.kind(), format!("Malformed ping: {err}"))
            });

        if !bus.post_message(self, sender, reply) {
            logger::warn!("Could not reply to {}.", sender);
        }
    }

    fn owner_name(&self) -> Option<String> {
        Some("demo responder".to_owned())
    }
}

/// Prints every shadow copy posted to the debug channel.
#[derive(Debug, Default)]
pub struct Tracer;

impl InboundMessageHandler for Tracer {
    fn inbound_message(
        &self,
        bus: &MessageBus,
        _sender: &Uid,
        message: &Message,
        _subscribe_handle: Option<SubscribeHandle>,
    ) {
        bus.confirm_message_delivery(message, self);
        println!("[trace] {}", message.body());
    }
}
