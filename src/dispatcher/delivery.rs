//! The delivery engine: mailboxes, the not-delivered set and the debug shadow.
//!

use std::sync::{Arc, Weak};
use tokio::sync::Notify;

use super::{BusState, MessageBus, ObjectInfo, QueueEntry};
use crate::{
    handler::ObjectKey, logger, InboundMessageHandler, Message, MessageChannel, MessageType,
    SubscribeHandle, Uid,
};

/// One message handed to a receiver.
pub(crate) struct Delivery {
    pub(crate) sender_uid: Uid,
    pub(crate) sender: Weak<dyn InboundMessageHandler>,
    pub(crate) message: Arc<Message>,
    pub(crate) subscribe_handle: Option<SubscribeHandle>,
}

/// The inbox of one registered receiver, drained by its own task.
pub(crate) struct Mailbox {
    queue: deadqueue::unlimited::Queue<Delivery>,
    terminate: Notify,
}

impl Mailbox {
    /// Create a mailbox and spawn the task invoking `receiver` for each delivery.
    pub(crate) fn spawn(
        runtime: &tokio::runtime::Handle,
        bus: Weak<MessageBus>,
        key: ObjectKey,
        receiver: Weak<dyn InboundMessageHandler>,
        advanced: bool,
    ) -> Arc<Self> {
        let mailbox = Arc::new(Self {
            queue: deadqueue::unlimited::Queue::new(),
            terminate: Notify::new(),
        });

        let task_mailbox = Arc::clone(&mailbox);
        runtime.spawn(async move {
            loop {
                let delivery = tokio::select! {
                    biased;
                    _ = task_mailbox.terminate.notified() => break,
                    delivery = task_mailbox.queue.pop() => delivery,
                };

                let Some(bus) = bus.upgrade() else {
                    break;
                };

                if !bus.is_current_mailbox(key, &task_mailbox) {
                    logger::debug!(
                        "Dropping {} for a receiver that is no longer registered.",
                        delivery.message.id()
                    );
                    continue;
                }

                let Some(receiver) = receiver.upgrade() else {
                    logger::debug!(
                        "Dropping {} for a receiver that has been dropped.",
                        delivery.message.id()
                    );
                    bus.forget_dropped(key);
                    continue;
                };

                receiver.inbound_message(
                    &bus,
                    &delivery.sender_uid,
                    &delivery.message,
                    delivery.subscribe_handle,
                );

                if advanced {
                    receiver.inbound_message_advanced(
                        &bus,
                        delivery.sender.upgrade(),
                        &delivery.sender_uid,
                        &delivery.message,
                        delivery.subscribe_handle,
                    );
                }
            }

            logger::trace!("Mailbox task terminated.");
        });

        mailbox
    }

    fn push(&self, delivery: Delivery) {
        self.queue.push(delivery);
    }

    /// Stop the mailbox task, discarding whatever it has not delivered yet.
    pub(crate) fn terminate(&self) {
        self.terminate.notify_one();
    }

    /// The number of deliveries not yet taken by the task.
    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}

impl MessageBus {
    /// Whether `mailbox` still belongs to the object registered as `key`.
    fn is_current_mailbox(&self, key: ObjectKey, mailbox: &Arc<Mailbox>) -> bool {
        self.state()
            .objects
            .get(&key)
            .is_some_and(|info| Arc::ptr_eq(&info.mailbox, mailbox))
    }

    /// Purge the registration of `key` if its receiver has been dropped.
    fn forget_dropped(&self, key: ObjectKey) {
        let mut state = self.state();

        if let Some(info) = state.objects.get(&key).cloned() {
            if info.receiver.strong_count() == 0 {
                self.purge_object(&mut state, &info);
                logger::debug!("Purged {} after its receiver was dropped.", info.description);
            }
        }
    }

    /// Hand every queued entry to its receiver's mailbox.
    pub(crate) fn drain_queue(&self, state: &mut BusState) {
        while let Some(entry) = state.queue.pop_front() {
            self.post_debug_shadow(state, &entry);

            state
                .not_delivered
                .entry(entry.message.id())
                .or_default()
                .push(entry.receiver.key);

            entry.receiver.mailbox.push(Delivery {
                sender_uid: entry.sender.uid.clone(),
                sender: entry.sender.receiver.clone(),
                message: entry.message,
                subscribe_handle: entry.subscribe_handle,
            });
        }
    }

    /// Buffer a description of `entry` for the subscribers of the debug channel.
    fn post_debug_shadow(&self, state: &mut BusState, entry: &QueueEntry) {
        if !self.config.debug_channel
            || entry.message.message_type() == MessageType::General
            || entry.receiver.uid == Uid::SHELL_DEBUG
            || entry.channel == Some(MessageChannel::MESSAGE_DEBUG)
            || !Self::channel_has_subscribers(state, MessageChannel::MESSAGE_DEBUG)
        {
            return;
        }

        let Some(dispatcher) = state.objects_of(&Uid::MESSAGE_DISPATCHER).into_iter().next() else {
            return;
        };

        let shadow = Message::new(MessageType::VariantList).with_body(serde_json::json!([
            entry.sender.description,
            entry.receiver.description,
            entry.message.to_printable(true, false),
            entry.message.id().value(),
            entry.message.feedback_id().map(|id| id.value()),
            entry.subscribe_handle.map(|handle| handle.value()),
        ]));

        if let Some(targets) =
            Self::resolve_channel(state, MessageChannel::MESSAGE_DEBUG, &dispatcher, &shadow)
        {
            self.put_to_buffer(
                state,
                &dispatcher,
                Some(MessageChannel::MESSAGE_DEBUG),
                targets,
                Arc::new(shadow),
            );
        }
    }

    /// Acknowledge that `receiver` has processed `message`.
    ///
    /// Returns `false` if there was nothing to acknowledge, including when the
    /// same delivery is confirmed twice.
    pub fn confirm_message_delivery(
        &self,
        message: &Message,
        receiver: &dyn InboundMessageHandler,
    ) -> bool {
        let key = ObjectKey::of(receiver);
        let mut state = self.state();

        let Some(receivers) = state.not_delivered.get_mut(&message.id()) else {
            return false;
        };

        let Some(position) = receivers.iter().position(|other| *other == key) else {
            return false;
        };

        receivers.remove(position);
        if receivers.is_empty() {
            state.not_delivered.remove(&message.id());
        }

        true
    }

    /// Whether `receiver` has been handed `message` without confirming it.
    pub fn is_awaiting_confirmation(
        &self,
        message: &Message,
        receiver: &dyn InboundMessageHandler,
    ) -> bool {
        let key = ObjectKey::of(receiver);

        self.state()
            .not_delivered
            .get(&message.id())
            .is_some_and(|receivers| receivers.contains(&key))
    }
}

impl ObjectInfo {
    /// Deliveries handed to the mailbox but not yet taken by its task.
    pub(crate) fn pending_deliveries(&self) -> usize {
        self.mailbox.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        BusConfig, SubscribeFilter,
        _tests::{wait_for_count, Recorder, Silent, ALPHA, GAMMA, SETTLE},
    };

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn confirmation_clears_not_delivered() {
        let bus = MessageBus::new_and_bootstrap(BusConfig::default())
            .expect("Failed to create bus.");
        let sender = Recorder::new_arc();
        let silent = Silent::new_arc();
        assert!(bus.register_object(GAMMA, sender.clone()));
        assert!(bus.register_object(ALPHA, silent.clone()));

        let message = Message::new(MessageType::Custom(4));
        assert!(bus.post_message(sender.as_ref(), &ALPHA, message.clone()));

        silent.wait_for(1).await;
        assert!(bus.is_awaiting_confirmation(&message, silent.as_ref()));

        assert!(bus.confirm_message_delivery(&message, silent.as_ref()));
        assert!(!bus.confirm_message_delivery(&message, silent.as_ref()));
        assert!(!bus.is_awaiting_confirmation(&message, silent.as_ref()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn advanced_handler_sees_the_sender() {
        let bus = MessageBus::new_and_bootstrap(BusConfig::default())
            .expect("Failed to create bus.");
        let sender = Recorder::new_arc();
        let receiver = Recorder::new_arc();
        assert!(bus.register_object(GAMMA, sender.clone()));
        assert!(bus.register_object_with_advanced(ALPHA, receiver.clone()));

        assert!(bus.post_message(sender.as_ref(), &ALPHA, Message::new(MessageType::Custom(1))));
        wait_for_count(&receiver, 1).await;
        tokio::time::sleep(SETTLE).await;

        let advanced = receiver.advanced();
        assert_eq!(advanced.len(), 1);
        assert_eq!(advanced[0], Some(ObjectKey::of(sender.as_ref())));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn debug_channel_shadows_non_general_messages() {
        let bus = MessageBus::new_and_bootstrap(BusConfig::default())
            .expect("Failed to create bus.");
        let sender = Recorder::new_arc();
        let receiver = Recorder::new_arc();
        let tracer = Recorder::new_arc();
        assert!(bus.register_object(GAMMA, sender.clone()));
        assert!(bus.register_object(ALPHA, receiver.clone()));
        assert!(bus.register_object(Uid::SHELL_DEBUG, tracer.clone()));
        bus.subscribe(MessageChannel::MESSAGE_DEBUG, tracer.as_ref(), SubscribeFilter::any())
            .expect("Failed to subscribe.");

        assert!(bus.post_message(sender.as_ref(), &ALPHA, Message::new(MessageType::General)));
        let traced = Message::new(MessageType::Progress);
        assert!(bus.post_message(sender.as_ref(), &ALPHA, traced.clone()));

        wait_for_count(&receiver, 2).await;
        wait_for_count(&tracer, 1).await;
        tokio::time::sleep(SETTLE).await;

        let shadows = tracer.received();
        assert_eq!(shadows.len(), 1);
        assert_eq!(shadows[0].message.message_type(), MessageType::VariantList);
        assert_eq!(shadows[0].sender, Uid::MESSAGE_DISPATCHER);

        let body = shadows[0]
            .message
            .body()
            .as_array()
            .expect("Shadow body should be a list.");
        assert_eq!(body.len(), 6);
        assert_eq!(body[3], serde_json::json!(traced.id().value()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn debug_channel_can_be_disabled() {
        let config = BusConfig {
            debug_channel: false,
            ..Default::default()
        };
        let bus = MessageBus::new_and_bootstrap(config).expect("Failed to create bus.");
        let sender = Recorder::new_arc();
        let receiver = Recorder::new_arc();
        let tracer = Recorder::new_arc();
        assert!(bus.register_object(GAMMA, sender.clone()));
        assert!(bus.register_object(ALPHA, receiver.clone()));
        assert!(bus.register_object(Uid::SHELL_DEBUG, tracer.clone()));
        bus.subscribe(MessageChannel::MESSAGE_DEBUG, tracer.as_ref(), SubscribeFilter::any())
            .expect("Failed to subscribe.");

        assert!(bus.post_message(sender.as_ref(), &ALPHA, Message::new(MessageType::Progress)));
        wait_for_count(&receiver, 1).await;
        tokio::time::sleep(SETTLE).await;

        assert!(tracer.received().is_empty());
    }
}
