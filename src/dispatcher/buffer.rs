//! The buffering pipeline: posting into the buffer and flushing it.
//!

use fxhash::FxHashSet;
use std::sync::{Arc, MutexGuard};

use super::{BufferEntry, BusState, MessageBus, ObjectInfo};
use crate::{
    handler::ObjectKey, logger, InboundMessageHandler, Message, MessageChannel, MessageCode,
    MessageId, MessageType, SubscribeHandle, Uid,
};

impl MessageBus {
    /// Post `message` from `sender` to every receiver registered under `receiver`.
    ///
    /// Returns `false` without side effects if the sender is not registered or
    /// nothing is registered under `receiver`.
    pub fn post_message(
        &self,
        sender: &dyn InboundMessageHandler,
        receiver: &Uid,
        message: Message,
    ) -> bool {
        if self.is_shut_down() {
            return false;
        }

        let mut state = self.state();

        let Some(sender) = state.objects.get(&ObjectKey::of(sender)).cloned() else {
            logger::debug!("Dropping {} from an unregistered sender.", message.id());
            return false;
        };
        self.purge_dropped(&mut state, receiver);

        let targets = state
            .objects_of(receiver)
            .into_iter()
            .map(|info| (info, None))
            .collect::<Vec<_>>();

        if targets.is_empty() {
            logger::debug!("Dropping {}: nothing is registered as {}.", message.id(), receiver);
            return false;
        }

        self.buffer_direct(state, &sender, targets, message);
        true
    }

    /// Post `message` from `sender` to one registered object.
    pub fn post_message_to_object(
        &self,
        sender: &dyn InboundMessageHandler,
        receiver: &dyn InboundMessageHandler,
        message: Message,
    ) -> bool {
        self.post_message_to_objects(sender, &[receiver], message)
    }

    /// Post `message` from `sender` to several registered objects.
    ///
    /// Unregistered receivers are skipped; returns `false` if none was left.
    pub fn post_message_to_objects(
        &self,
        sender: &dyn InboundMessageHandler,
        receivers: &[&dyn InboundMessageHandler],
        message: Message,
    ) -> bool {
        if self.is_shut_down() {
            return false;
        }

        let state = self.state();

        let Some(sender) = state.objects.get(&ObjectKey::of(sender)).cloned() else {
            return false;
        };

        let targets = receivers
            .iter()
            .filter_map(|receiver| state.objects.get(&ObjectKey::of(*receiver)).cloned())
            .map(|info| (info, None))
            .collect::<Vec<_>>();

        if targets.is_empty() {
            return false;
        }

        self.buffer_direct(state, &sender, targets, message);
        true
    }

    /// Buffer a direct post, flushing it at once if it answers a forced
    /// synchronous call.
    fn buffer_direct(
        &self,
        mut state: MutexGuard<'_, BusState>,
        sender: &Arc<ObjectInfo>,
        targets: Vec<(Arc<ObjectInfo>, Option<SubscribeHandle>)>,
        message: Message,
    ) {
        let forced = self
            .is_forced_reply(&targets, &message)
            .then(|| message.id());

        self.put_to_buffer(&mut state, sender, None, targets, Arc::new(message));
        drop(state);

        if let Some(id) = forced {
            let ids = [id].into_iter().collect::<FxHashSet<_>>();
            self.process_buffer(Some(&ids));
        }
    }

    /// Post a [`MessageType::General`] message carrying only `code`.
    ///
    /// Returns the identifier of the posted message, if it was accepted.
    pub fn post_code(
        &self,
        sender: &dyn InboundMessageHandler,
        receiver: &Uid,
        code: MessageCode,
        feedback_id: Option<MessageId>,
    ) -> Option<MessageId> {
        let mut message = Message::new(MessageType::General).with_code(code);
        if let Some(feedback_id) = feedback_id {
            message = message.with_feedback_id(feedback_id);
        }
        let id = message.id();

        self.post_message(sender, receiver, message).then_some(id)
    }

    /// Post `message` to every matching subscriber of `channel`.
    ///
    /// `sender` defaults to [`Uid::MESSAGE_DISPATCHER`]. Returns `false` if the
    /// sender is not registered, the channel is not registered, or the type of
    /// the message is blocked on it.
    pub fn post_message_to_channel(
        &self,
        channel: MessageChannel,
        sender: Option<&Uid>,
        message: Message,
    ) -> bool {
        self.post_message_to_channels(&[channel], sender, message)
    }

    /// Post `message` to the matching subscribers of several channels.
    ///
    /// Returns `true` only if every channel accepted the message; the channels
    /// that did accept it still deliver it.
    pub fn post_message_to_channels(
        &self,
        channels: &[MessageChannel],
        sender: Option<&Uid>,
        message: Message,
    ) -> bool {
        if self.is_shut_down() {
            return false;
        }

        let dispatcher_uid = Uid::MESSAGE_DISPATCHER;
        let sender_uid = sender.unwrap_or(&dispatcher_uid);
        let mut state = self.state();

        let Some(sender) = state.objects_of(sender_uid).into_iter().next() else {
            logger::debug!("Dropping {} from unregistered sender {}.", message.id(), sender_uid);
            return false;
        };

        let message = Arc::new(message);
        let mut result = true;

        for channel in channels {
            match Self::resolve_channel(&state, *channel, &sender, &message) {
                Some(targets) => self.put_to_buffer(
                    &mut state,
                    &sender,
                    Some(*channel),
                    targets,
                    Arc::clone(&message),
                ),
                None => result = false,
            }
        }

        result
    }

    /// The subscribers of `channel` that accept `message`, in subscription order.
    ///
    /// [`None`] if the channel does not admit the message at all.
    pub(crate) fn resolve_channel(
        state: &BusState,
        channel: MessageChannel,
        sender: &ObjectInfo,
        message: &Message,
    ) -> Option<Vec<(Arc<ObjectInfo>, Option<SubscribeHandle>)>> {
        let Some(info) = state.channels.get(&channel) else {
            logger::debug!("Dropping {}: channel {} is not registered.", message.id(), channel);
            return None;
        };

        if info.is_blocked(message.message_type()) {
            logger::trace!(
                "Dropping {}: {} is blocked on channel {}.",
                message.id(),
                message.message_type(),
                channel
            );
            return None;
        }

        Some(
            info.subscriptions
                .iter()
                .filter_map(|handle| state.subscriptions.get(handle))
                .filter(|subscription| subscription.filter.accepts(&sender.uid, message))
                .map(|subscription| (Arc::clone(&subscription.object), Some(subscription.handle)))
                .collect(),
        )
    }

    /// Append one entry per target to the buffer and arm the flush task.
    pub(crate) fn put_to_buffer(
        &self,
        state: &mut BusState,
        sender: &Arc<ObjectInfo>,
        channel: Option<MessageChannel>,
        targets: Vec<(Arc<ObjectInfo>, Option<SubscribeHandle>)>,
        message: Arc<Message>,
    ) {
        if targets.is_empty() {
            return;
        }

        logger::trace!(
            "Buffering {} from {} for {} receiver(s).",
            message.to_printable(true, true),
            sender.description,
            targets.len()
        );

        state
            .buffer
            .extend(targets.into_iter().map(|(receiver, subscribe_handle)| BufferEntry {
                sender: Arc::clone(sender),
                receiver,
                channel,
                subscribe_handle,
                message: Arc::clone(&message),
            }));

        self.arm_flush();
    }

    /// Wake the flush task.
    pub(crate) fn arm_flush(&self) {
        self.flush_flag.notify_one();
    }

    /// Move up to one step of admitted buffer entries into the delivery queue,
    /// then deliver the whole queue.
    ///
    /// With `force`, only the entries of those messages are admitted, regardless
    /// of the pause counter and the allow-list.
    pub(crate) fn process_buffer(&self, force: Option<&FxHashSet<MessageId>>) {
        let mut guard = self.state();
        let state = &mut *guard;

        if state.stop_count > 0 && force.is_none() {
            return;
        }

        let mut admitted = 0;
        let mut not_enabled = 0;
        let mut index = 0;

        while index < state.buffer.len() && admitted < self.config.one_step {
            let entry = &state.buffer[index];

            let eligible = match force {
                Some(ids) => ids.contains(&entry.message.id()),
                None if state.enabled_receivers.is_empty() => true,
                None => {
                    let enabled = state.enabled_receivers.contains(&entry.receiver.uid);
                    if !enabled {
                        not_enabled += 1;
                    }
                    enabled
                }
            };

            if !eligible {
                index += 1;
                continue;
            }

            if let Some(entry) = state.buffer.remove(index) {
                state.queue.push_back(entry.into());
                admitted += 1;
            }
        }

        if state.stop_count == 0 && state.buffer.len() > not_enabled {
            self.arm_flush();
        }

        if admitted > 0 {
            logger::debug!(
                "Flushed {} message(s); {} left in the buffer, {} held back.",
                admitted,
                state.buffer.len(),
                not_enabled
            );
        }

        self.drain_queue(state);
    }

    /// Spawn the flush task, once.
    pub(crate) fn spawn_flush_task(&self) {
        let weak_bus = self.weak_self.clone();
        let flush_flag = Arc::clone(&self.flush_flag);
        let terminate_flag = Arc::clone(&self.terminate_flag);
        let interval = self.config.flush_interval();

        self.flush_handle.get_or_init(|| {
            self.runtime.spawn(async move {
                loop {
                    tokio::select! {
                        biased;
                        _ = terminate_flag.notified() => {
                            logger::debug!("Terminating flush task.");
                            break;
                        }
                        _ = flush_flag.notified() => {}
                    }

                    if interval.is_zero() {
                        tokio::task::yield_now().await;
                    } else {
                        tokio::time::sleep(interval).await;
                    }

                    if let Some(bus) = weak_bus.upgrade() {
                        bus.process_buffer(None);
                    } else {
                        logger::debug!("Terminating flush task due to dropped reference.");
                        break;
                    }
                }
            })
        });
    }
}
