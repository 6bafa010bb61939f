//! The synchronous correlation layer: sending and waiting for replies.
//!

use fxhash::FxHashSet;
use std::sync::Arc;

use super::{MessageBus, ObjectInfo};
use crate::{
    handler::ObjectKey,
    logger,
    postbox::{CallerKey, PostBox, SendGuard},
    CourierError, InboundMessageHandler, Message, SubscribeHandle, Uid,
};

/// The receiver registered under [`Uid::MESSAGE_DISPATCHER`].
///
/// Synchronous calls are posted on its behalf, so every reply is addressed to
/// it; it hands them to the postbox.
pub(crate) struct ReplyCollector {
    postbox: Arc<PostBox>,
}

impl ReplyCollector {
    pub(crate) fn new(postbox: Arc<PostBox>) -> Self {
        Self { postbox }
    }
}

impl InboundMessageHandler for ReplyCollector {
    fn inbound_message(
        &self,
        bus: &MessageBus,
        sender: &Uid,
        message: &Message,
        _subscribe_handle: Option<SubscribeHandle>,
    ) {
        bus.confirm_message_delivery(message, self);

        if !self.postbox.resolve(message) {
            logger::trace!("No synchronous call is waiting for {} from {}.", message.id(), sender);
        }
    }

    fn owner_name(&self) -> Option<String> {
        Some("reply collector".to_owned())
    }
}

impl MessageBus {
    /// Send `messages` to `receiver` and wait for a reply to each of them.
    ///
    /// The replies are returned in the order of `messages`; a message that was
    /// not answered within `timeout` is answered with a timeout error instead
    /// (see [`Message::is_timeout_error`]). `timeout` defaults to
    /// [`BusConfig::default_send_timeout`](crate::BusConfig::default_send_timeout);
    /// no timeout, or a zero one, waits forever.
    ///
    /// With `force` the messages, and later their replies, are flushed
    /// immediately, even if the bus is paused or `receiver` is not on the
    /// allow-list.
    ///
    /// A task, or a thread outside of any task, can only wait for one call at a
    /// time; a second concurrent call from it is a
    /// [`CourierError::ContractViolation`].
    pub async fn send_messages(
        &self,
        receiver: &dyn InboundMessageHandler,
        messages: Vec<Message>,
        timeout: Option<tokio::time::Duration>,
        force: bool,
    ) -> Result<Vec<Message>, CourierError> {
        if messages.is_empty() {
            return Err(CourierError::ContractViolation(
                "A synchronous call needs at least one message.".to_owned(),
            ));
        }
        self.ensure_bootstrapped()?;

        let ids = messages.iter().map(Message::id).collect::<Vec<_>>();
        let context = self.postbox.open(CallerKey::current(), ids.clone(), force)?;
        let guard = SendGuard::new(&self.postbox, context);

        self.post_for_reply(receiver, messages)?;

        if force {
            self.process_buffer(Some(&ids.iter().copied().collect::<FxHashSet<_>>()));
        }

        let timeout = timeout.or_else(|| self.config.default_send_timeout());
        if !guard.context().wait_for(timeout).await {
            logger::warn!(
                "Synchronous call timed out after {:?} with {} of {} replies.",
                timeout.unwrap_or_default(),
                guard
                    .context()
                    .replies()
                    .iter()
                    .filter(|reply| !reply.is_timeout_error())
                    .count(),
                ids.len()
            );
        }

        Ok(guard.context().replies())
    }

    /// Send one message to `receiver` and wait for its reply.
    ///
    /// See [`Self::send_messages`].
    pub async fn send_message(
        &self,
        receiver: &dyn InboundMessageHandler,
        message: Message,
        timeout: Option<tokio::time::Duration>,
        force: bool,
    ) -> Result<Message, CourierError> {
        let id = message.id();

        self.send_messages(receiver, vec![message], timeout, force)
            .await
            .map(|mut replies| replies.pop().unwrap_or_else(|| Message::timeout_error(id)))
    }

    /// Send one message to the only receiver registered under `uid`.
    ///
    /// Fails with [`CourierError::ReceiverNotRegistered`] if nothing is
    /// registered under `uid`, and with [`CourierError::ContractViolation`] if
    /// the uid is shared by several receivers.
    pub async fn send_message_to_uid(
        &self,
        uid: &Uid,
        message: Message,
        timeout: Option<tokio::time::Duration>,
        force: bool,
    ) -> Result<Message, CourierError> {
        let mut receivers = self.objects(uid);

        let receiver = match receivers.len() {
            0 => return Err(CourierError::ReceiverNotRegistered(uid.to_printable())),
            1 => receivers.remove(0),
            count => {
                return Err(CourierError::ContractViolation(format!(
                    "{count} receivers share {uid}; a synchronous call needs exactly one."
                )))
            }
        };

        self.send_message(receiver.as_ref(), message, timeout, force)
            .await
    }

    /// Buffer `messages` for `receiver`, sent by the reply collector.
    fn post_for_reply(
        &self,
        receiver: &dyn InboundMessageHandler,
        messages: Vec<Message>,
    ) -> Result<(), CourierError> {
        let collector_key = ObjectKey::of(self.collector.as_ref());
        let mut state = self.state();

        let collector = state
            .objects
            .get(&collector_key)
            .cloned()
            .ok_or(CourierError::NotBootstrapped)?;

        let target = state
            .objects
            .get(&ObjectKey::of(receiver))
            .cloned()
            .ok_or_else(|| {
                CourierError::ReceiverNotRegistered(
                    receiver
                        .owner_name()
                        .unwrap_or_else(|| "unnamed receiver".to_owned()),
                )
            })?;

        for message in messages {
            self.put_to_buffer(
                &mut state,
                &collector,
                None,
                vec![(Arc::clone(&target), None)],
                Arc::new(message),
            );
        }

        Ok(())
    }

    /// Whether `message`, posted to `targets`, answers a forced synchronous call.
    pub(crate) fn is_forced_reply(
        &self,
        targets: &[(Arc<ObjectInfo>, Option<SubscribeHandle>)],
        message: &Message,
    ) -> bool {
        let collector_key = ObjectKey::of(self.collector.as_ref());

        targets.iter().any(|(info, _)| info.key == collector_key)
            && self.postbox.awaits_forced_reply(message)
    }

    /// The number of synchronous calls currently waiting.
    pub fn pending_sends(&self) -> usize {
        self.postbox.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        BusConfig, MessageType,
        _tests::{Echo, Silent, ALPHA, BETA, PING, PONG},
    };

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn round_trip() {
        let bus = MessageBus::new_and_bootstrap(BusConfig::default())
            .expect("Failed to create bus.");
        let echo = Echo::new_arc();
        assert!(bus.register_object(ALPHA, echo.clone()));

        let ping = Message::new(PING);
        let reply = bus
            .send_message(
                echo.as_ref(),
                ping.clone(),
                Some(tokio::time::Duration::from_secs(1)),
                false,
            )
            .await
            .expect("Send should succeed.");

        assert_eq!(reply.message_type(), PONG);
        assert_eq!(reply.feedback_id(), Some(ping.id()));
        assert_eq!(bus.pending_sends(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn replies_keep_request_order() {
        let bus = MessageBus::new_and_bootstrap(BusConfig::default())
            .expect("Failed to create bus.");
        let echo = Echo::new_arc();
        assert!(bus.register_object(ALPHA, echo.clone()));

        let requests = (0..3).map(|_| Message::new(PING)).collect::<Vec<_>>();
        let replies = bus
            .send_messages(
                echo.as_ref(),
                requests.clone(),
                Some(tokio::time::Duration::from_secs(1)),
                false,
            )
            .await
            .expect("Send should succeed.");

        assert_eq!(replies.len(), 3);
        for (request, reply) in requests.iter().zip(replies.iter()) {
            assert_eq!(reply.feedback_id(), Some(request.id()));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn repeated_message_does_not_wait_for_timeout() {
        let bus = MessageBus::new_and_bootstrap(BusConfig::default())
            .expect("Failed to create bus.");
        let echo = Echo::new_arc();
        assert!(bus.register_object(ALPHA, echo.clone()));

        let ping = Message::new(PING);
        let timeout = tokio::time::Duration::from_secs(2);
        let started = tokio::time::Instant::now();
        let replies = bus
            .send_messages(echo.as_ref(), vec![ping.clone(), ping.clone()], Some(timeout), false)
            .await
            .expect("Send should succeed.");

        assert!(started.elapsed() < timeout);
        assert_eq!(replies.len(), 2);
        for reply in replies {
            assert_eq!(reply.message_type(), PONG);
            assert_eq!(reply.feedback_id(), Some(ping.id()));
        }
        assert_eq!(bus.pending_sends(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn forced_send_bypasses_pause() {
        let bus = MessageBus::new_and_bootstrap(BusConfig::default())
            .expect("Failed to create bus.");
        let echo = Echo::new_arc();
        assert!(bus.register_object(ALPHA, echo.clone()));

        bus.stop();
        let reply = bus
            .send_message(
                echo.as_ref(),
                Message::new(PING),
                Some(tokio::time::Duration::from_millis(500)),
                true,
            )
            .await
            .expect("Send should succeed.");
        assert_eq!(reply.message_type(), PONG);
        assert!(!bus.is_started());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn silent_receiver_times_out() {
        let bus = MessageBus::new_and_bootstrap(BusConfig::default())
            .expect("Failed to create bus.");
        let silent = Silent::new_arc();
        assert!(bus.register_object(ALPHA, silent.clone()));

        let ping = Message::new(PING);
        let started = tokio::time::Instant::now();
        let reply = bus
            .send_message(
                silent.as_ref(),
                ping.clone(),
                Some(tokio::time::Duration::from_millis(50)),
                false,
            )
            .await
            .expect("A timeout is not an error.");

        assert!(started.elapsed() >= tokio::time::Duration::from_millis(50));
        assert!(reply.is_timeout_error());
        assert_eq!(reply.feedback_id(), Some(ping.id()));
        assert_eq!(bus.pending_sends(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn nested_send_from_one_caller_is_rejected() {
        let bus = MessageBus::new_and_bootstrap(BusConfig::default())
            .expect("Failed to create bus.");
        let silent = Silent::new_arc();
        assert!(bus.register_object(ALPHA, silent.clone()));
        let timeout = Some(tokio::time::Duration::from_millis(50));

        let (first, second) = tokio::join!(
            bus.send_message(silent.as_ref(), Message::new(PING), timeout, false),
            bus.send_message(silent.as_ref(), Message::new(PING), timeout, false),
        );

        assert!(first.expect("The first call should proceed.").is_timeout_error());
        assert!(matches!(second, Err(CourierError::ContractViolation(_))));
        assert_eq!(bus.pending_sends(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn send_preconditions() {
        let bus = MessageBus::new(BusConfig::default()).expect("Failed to create bus.");
        let echo = Echo::new_arc();

        assert!(matches!(
            bus.send_message(echo.as_ref(), Message::new(PING), None, false).await,
            Err(CourierError::NotBootstrapped)
        ));

        bus.bootstrap().expect("Failed to bootstrap.");
        assert!(matches!(
            bus.send_messages(echo.as_ref(), Vec::new(), None, false).await,
            Err(CourierError::ContractViolation(_))
        ));
        assert!(matches!(
            bus.send_message(echo.as_ref(), Message::new(PING), None, false).await,
            Err(CourierError::ReceiverNotRegistered(_))
        ));
        assert_eq!(bus.pending_sends(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn send_to_uid_needs_exactly_one_receiver() {
        let bus = MessageBus::new_and_bootstrap(BusConfig::default())
            .expect("Failed to create bus.");
        let timeout = Some(tokio::time::Duration::from_secs(1));

        assert!(matches!(
            bus.send_message_to_uid(&ALPHA, Message::new(PING), timeout, false).await,
            Err(CourierError::ReceiverNotRegistered(_))
        ));

        let echo = Echo::new_arc();
        assert!(bus.register_object(ALPHA, echo.clone()));
        let reply = bus
            .send_message_to_uid(&ALPHA, Message::new(PING), timeout, false)
            .await
            .expect("Send should succeed.");
        assert_eq!(reply.message_type(), PONG);

        let first = Echo::new_arc();
        let second = Echo::new_arc();
        assert!(bus.register_object(BETA, first.clone()));
        assert!(bus.register_object(BETA, second.clone()));
        assert!(matches!(
            bus.send_message_to_uid(&BETA, Message::new(PING), timeout, false).await,
            Err(CourierError::ContractViolation(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn late_replies_are_ignored() {
        let bus = MessageBus::new_and_bootstrap(BusConfig::default())
            .expect("Failed to create bus.");
        let silent = Silent::new_arc();
        assert!(bus.register_object(ALPHA, silent.clone()));

        let ping = Message::new(PING);
        let reply = bus
            .send_message(
                silent.as_ref(),
                ping.clone(),
                Some(tokio::time::Duration::from_millis(20)),
                false,
            )
            .await
            .expect("A timeout is not an error.");
        assert!(reply.is_timeout_error());

        // Answering after the call returned reaches nobody.
        assert!(bus.post_message(
            silent.as_ref(),
            &Uid::MESSAGE_DISPATCHER,
            Message::reply_to(&ping, MessageType::Custom(2))
        ));
        tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
        assert_eq!(bus.pending_sends(), 0);
    }
}
