//! The channel directory: broadcast channels, subscriptions and type blocking.
//!

use fxhash::FxHashMap;
use std::{collections::BTreeMap, sync::Arc};

use super::{BusState, MessageBus, ObjectInfo};
use crate::{
    handler::ObjectKey, logger, CourierError, EntityCode, InboundMessageHandler, Message,
    MessageChannel, MessageType, SubscribeHandle, Uid,
};

/// Which channel posts a subscription accepts.
///
/// A filter with all four lists empty accepts every message. Otherwise the
/// lists are grouped into a *content* filter (`contains_types`,
/// `contains_uids`: matched against [`Message::entities`]) and a *sender*
/// filter (`sender_types`, `sender_uids`: matched against the sending uid).
/// Within a group any match is enough; a group that is present must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeFilter {
    pub contains_types: Vec<EntityCode>,
    pub contains_uids: Vec<Uid>,
    pub sender_types: Vec<EntityCode>,
    pub sender_uids: Vec<Uid>,
}

impl SubscribeFilter {
    /// A filter accepting every message.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_contains_types(mut self, codes: impl IntoIterator<Item = EntityCode>) -> Self {
        self.contains_types.extend(codes);
        self
    }

    pub fn with_contains_uids(mut self, uids: impl IntoIterator<Item = Uid>) -> Self {
        self.contains_uids.extend(uids);
        self
    }

    pub fn with_sender_types(mut self, codes: impl IntoIterator<Item = EntityCode>) -> Self {
        self.sender_types.extend(codes);
        self
    }

    pub fn with_sender_uids(mut self, uids: impl IntoIterator<Item = Uid>) -> Self {
        self.sender_uids.extend(uids);
        self
    }

    /// Whether this filter accepts every message.
    pub fn is_any(&self) -> bool {
        self.contains_types.is_empty()
            && self.contains_uids.is_empty()
            && self.sender_types.is_empty()
            && self.sender_uids.is_empty()
    }

    /// Whether a message from `sender` passes this filter.
    pub fn accepts(&self, sender: &Uid, message: &Message) -> bool {
        if self.is_any() {
            return true;
        }

        let has_content_filter = !self.contains_types.is_empty() || !self.contains_uids.is_empty();
        if has_content_filter
            && !message.contains_any_type(&self.contains_types)
            && !message.contains_any_uid(&self.contains_uids)
        {
            return false;
        }

        let has_sender_filter = !self.sender_types.is_empty() || !self.sender_uids.is_empty();
        if has_sender_filter
            && !self.sender_types.contains(&sender.entity_code())
            && !self.sender_uids.contains(sender)
        {
            return false;
        }

        true
    }
}

/// A registered broadcast channel.
#[derive(Debug)]
pub(crate) struct ChannelInfo {
    pub(crate) id: MessageChannel,

    /// Subscriptions in the order they were made.
    pub(crate) subscriptions: Vec<SubscribeHandle>,
    pub(crate) by_object: FxHashMap<ObjectKey, Vec<SubscribeHandle>>,

    /// Reference counts of the blocked message types.
    pub(crate) blocked_types: BTreeMap<MessageType, usize>,
}

impl ChannelInfo {
    fn new(id: MessageChannel) -> Self {
        Self {
            id,
            subscriptions: Vec::new(),
            by_object: FxHashMap::default(),
            blocked_types: BTreeMap::new(),
        }
    }

    pub(crate) fn handles_of(&self, key: ObjectKey) -> Vec<SubscribeHandle> {
        self.by_object.get(&key).cloned().unwrap_or_default()
    }

    pub(crate) fn is_blocked(&self, message_type: MessageType) -> bool {
        self.blocked_types.contains_key(&message_type)
    }
}

/// One subscription of one object on one channel.
#[derive(Debug)]
pub(crate) struct SubscribeInfo {
    pub(crate) handle: SubscribeHandle,
    pub(crate) channel: MessageChannel,
    pub(crate) object: Arc<ObjectInfo>,
    pub(crate) filter: SubscribeFilter,
}

impl MessageBus {
    /// Register a broadcast channel; `false` if it already exists.
    pub fn register_channel(&self, channel: MessageChannel) -> bool {
        let mut state = self.state();

        if state.channels.contains_key(&channel) {
            return false;
        }

        state.channels.insert(channel, ChannelInfo::new(channel));
        logger::trace!("Registered channel {channel}.");
        true
    }

    pub fn is_channel_registered(&self, channel: MessageChannel) -> bool {
        self.state().channels.contains_key(&channel)
    }

    /// Whether anything is subscribed to `channel`.
    pub fn has_subscribers(&self, channel: MessageChannel) -> bool {
        Self::channel_has_subscribers(&self.state(), channel)
    }

    pub(crate) fn channel_has_subscribers(state: &BusState, channel: MessageChannel) -> bool {
        state
            .channels
            .get(&channel)
            .is_some_and(|info| !info.subscriptions.is_empty())
    }

    /// The handles of the subscriptions of `subscriber` on `channel`.
    pub fn subscribe_handles(
        &self,
        channel: MessageChannel,
        subscriber: &dyn InboundMessageHandler,
    ) -> Vec<SubscribeHandle> {
        self.state()
            .channels
            .get(&channel)
            .map(|info| info.handles_of(ObjectKey::of(subscriber)))
            .unwrap_or_default()
    }

    /// Subscribe `subscriber` to `channel`.
    ///
    /// Returns [`None`] if the subscriber or the channel is not registered.
    pub fn subscribe(
        &self,
        channel: MessageChannel,
        subscriber: &dyn InboundMessageHandler,
        filter: SubscribeFilter,
    ) -> Option<SubscribeHandle> {
        self.subscribe_channels(&[channel], subscriber, filter)
            .into_iter()
            .next()
    }

    /// Subscribe `subscriber` to every channel in `channels` with the same filter.
    ///
    /// This is all or nothing: if any channel is not registered, no subscription
    /// is made and the result is empty.
    pub fn subscribe_channels(
        &self,
        channels: &[MessageChannel],
        subscriber: &dyn InboundMessageHandler,
        filter: SubscribeFilter,
    ) -> Vec<SubscribeHandle> {
        let key = ObjectKey::of(subscriber);
        let mut guard = self.state();
        let state = &mut *guard;

        let Some(object) = state.objects.get(&key).cloned() else {
            logger::debug!("Cannot subscribe an unregistered object to {:?}.", channels);
            return Vec::new();
        };

        if let Some(missing) = channels
            .iter()
            .find(|channel| !state.channels.contains_key(*channel))
        {
            logger::debug!(
                "Cannot subscribe {} to unregistered channel {}.",
                object.description,
                missing
            );
            return Vec::new();
        }

        channels
            .iter()
            .filter_map(|channel| {
                let handle = SubscribeHandle::generate();
                let info = state.channels.get_mut(channel)?;

                info.subscriptions.push(handle);
                info.by_object.entry(key).or_default().push(handle);
                state.subscriptions.insert(
                    handle,
                    SubscribeInfo {
                        handle,
                        channel: *channel,
                        object: Arc::clone(&object),
                        filter: filter.clone(),
                    },
                );
                logger::trace!("Subscribed {} to {} as {}.", object.description, channel, handle);

                Some(handle)
            })
            .collect()
    }

    /// Remove a subscription; `false` if the handle is unknown.
    ///
    /// Buffered messages routed through the subscription are discarded.
    pub fn unsubscribe(&self, handle: SubscribeHandle) -> bool {
        Self::remove_subscription(&mut self.state(), handle)
    }

    /// Remove several subscriptions; `false` if any handle was unknown.
    pub fn unsubscribe_handles(&self, handles: &[SubscribeHandle]) -> bool {
        let mut state = self.state();

        handles.iter().fold(true, |result, handle| {
            Self::remove_subscription(&mut state, *handle) && result
        })
    }

    /// Remove every subscription of `subscriber`.
    pub fn unsubscribe_object(&self, subscriber: &dyn InboundMessageHandler) {
        let key = ObjectKey::of(subscriber);
        let mut state = self.state();

        let handles = state
            .channels
            .values()
            .flat_map(|channel| channel.handles_of(key))
            .collect::<Vec<_>>();
        for handle in handles {
            Self::remove_subscription(&mut state, handle);
        }
    }

    pub(crate) fn remove_subscription(state: &mut BusState, handle: SubscribeHandle) -> bool {
        let Some(info) = state.subscriptions.remove(&handle) else {
            return false;
        };

        if let Some(channel) = state.channels.get_mut(&info.channel) {
            channel.subscriptions.retain(|other| *other != handle);
            if let Some(handles) = channel.by_object.get_mut(&info.object.key) {
                handles.retain(|other| *other != handle);
                if handles.is_empty() {
                    channel.by_object.remove(&info.object.key);
                }
            }
            logger::trace!(
                "Removed subscription {} of {} from {}.",
                handle,
                info.object.description,
                channel.id
            );
        }

        state
            .buffer
            .retain(|entry| entry.subscribe_handle != Some(handle));
        state
            .queue
            .retain(|entry| entry.subscribe_handle != Some(handle));

        true
    }

    /// Block posts of `message_type` to `channel`.
    ///
    /// Blocking is reference counted: the type stays blocked until it has been
    /// unblocked as many times as it was blocked.
    pub fn block_channel_message_type(
        &self,
        channel: MessageChannel,
        message_type: MessageType,
    ) -> Result<(), CourierError> {
        let mut state = self.state();

        let info = state.channels.get_mut(&channel).ok_or_else(|| {
            CourierError::ContractViolation(format!(
                "Cannot block {message_type} on unregistered channel {channel}."
            ))
        })?;

        *info.blocked_types.entry(message_type).or_default() += 1;
        Ok(())
    }

    /// Undo one [`Self::block_channel_message_type`], returning how many blocks
    /// remain.
    pub fn unblock_channel_message_type(
        &self,
        channel: MessageChannel,
        message_type: MessageType,
    ) -> Result<usize, CourierError> {
        let mut state = self.state();

        let info = state.channels.get_mut(&channel).ok_or_else(|| {
            CourierError::ContractViolation(format!(
                "Cannot unblock {message_type} on unregistered channel {channel}."
            ))
        })?;

        let count = info.blocked_types.get_mut(&message_type).ok_or_else(|| {
            CourierError::ContractViolation(format!(
                "{message_type} is not blocked on channel {channel}."
            ))
        })?;

        *count -= 1;
        let remaining = *count;
        if remaining == 0 {
            info.blocked_types.remove(&message_type);
        }

        Ok(remaining)
    }

    /// The message types currently blocked on `channel`.
    pub fn blocked_channel_message_types(&self, channel: MessageChannel) -> Vec<MessageType> {
        self.state()
            .channels
            .get(&channel)
            .map(|info| info.blocked_types.keys().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        _tests::{Recorder, ALPHA, BETA, GAMMA, SETTLE},
        BusConfig,
    };

    const USER_CHANNEL: MessageChannel = MessageChannel::new(MessageChannel::MIN_USER_CHANNEL);

    #[test]
    fn filter_any_accepts_everything() {
        let filter = SubscribeFilter::any();

        assert!(filter.is_any());
        assert!(filter.accepts(&ALPHA, &Message::new(MessageType::General)));
        assert!(filter.accepts(&BETA, &Message::new(MessageType::Progress).with_entity(GAMMA)));
    }

    #[test]
    fn filter_content_and_sender_groups() {
        let content = SubscribeFilter::any().with_contains_uids([ALPHA]);
        assert!(!content.is_any());
        assert!(content.accepts(&GAMMA, &Message::new(MessageType::General).with_entity(ALPHA)));
        assert!(!content.accepts(&GAMMA, &Message::new(MessageType::General).with_entity(BETA)));

        let by_type = SubscribeFilter::any().with_contains_types([BETA.entity_code()]);
        assert!(by_type.accepts(&GAMMA, &Message::new(MessageType::General).with_entity(BETA)));
        assert!(!by_type.accepts(&GAMMA, &Message::new(MessageType::General)));

        let sender = SubscribeFilter::any().with_sender_uids([GAMMA]);
        assert!(sender.accepts(&GAMMA, &Message::new(MessageType::General)));
        assert!(!sender.accepts(&ALPHA, &Message::new(MessageType::General)));

        let both = SubscribeFilter::any()
            .with_contains_uids([ALPHA])
            .with_sender_types([GAMMA.entity_code()]);
        let about_alpha = Message::new(MessageType::General).with_entity(ALPHA);
        assert!(both.accepts(&GAMMA, &about_alpha));
        assert!(!both.accepts(&BETA, &about_alpha));
        assert!(!both.accepts(&GAMMA, &Message::new(MessageType::General).with_entity(BETA)));
    }

    #[tokio::test]
    async fn subscribe_is_all_or_nothing() {
        let bus = MessageBus::new_and_bootstrap(BusConfig::default())
            .expect("Failed to create bus.");
        let recorder = Recorder::new_arc();

        assert!(bus
            .subscribe(MessageChannel::GENERAL, recorder.as_ref(), SubscribeFilter::any())
            .is_none());

        assert!(bus.register_object(ALPHA, recorder.clone()));
        let handles = bus.subscribe_channels(
            &[MessageChannel::GENERAL, USER_CHANNEL],
            recorder.as_ref(),
            SubscribeFilter::any(),
        );
        assert!(handles.is_empty());
        assert!(!bus.has_subscribers(MessageChannel::GENERAL));

        assert!(bus.register_channel(USER_CHANNEL));
        assert!(!bus.register_channel(USER_CHANNEL));
        let handles = bus.subscribe_channels(
            &[MessageChannel::GENERAL, USER_CHANNEL],
            recorder.as_ref(),
            SubscribeFilter::any(),
        );
        assert_eq!(handles.len(), 2);
        assert_eq!(
            bus.subscribe_handles(USER_CHANNEL, recorder.as_ref()),
            vec![handles[1]]
        );

        assert!(bus.unsubscribe_handles(&handles));
        assert!(!bus.unsubscribe_handles(&handles));
        assert!(!bus.has_subscribers(USER_CHANNEL));
    }

    #[tokio::test]
    async fn unsubscribe_object_removes_all() {
        let bus = MessageBus::new_and_bootstrap(BusConfig::default())
            .expect("Failed to create bus.");
        let recorder = Recorder::new_arc();
        assert!(bus.register_object(ALPHA, recorder.clone()));

        for channel in [MessageChannel::GENERAL, MessageChannel::INTERNAL] {
            assert!(bus
                .subscribe(channel, recorder.as_ref(), SubscribeFilter::any())
                .is_some());
        }

        bus.unsubscribe_object(recorder.as_ref());
        assert!(!bus.has_subscribers(MessageChannel::GENERAL));
        assert!(!bus.has_subscribers(MessageChannel::INTERNAL));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unsubscribing_discards_buffered_posts() {
        let bus = MessageBus::new_and_bootstrap(BusConfig::default())
            .expect("Failed to create bus.");
        let by_handle = Recorder::new_arc();
        let by_handles = Recorder::new_arc();
        let by_object = Recorder::new_arc();
        assert!(bus.register_object(ALPHA, by_handle.clone()));
        assert!(bus.register_object(BETA, by_handles.clone()));
        assert!(bus.register_object(GAMMA, by_object.clone()));

        let handle = bus
            .subscribe(MessageChannel::GENERAL, by_handle.as_ref(), SubscribeFilter::any())
            .expect("Failed to subscribe.");
        let handles = bus.subscribe_channels(
            &[MessageChannel::GENERAL],
            by_handles.as_ref(),
            SubscribeFilter::any(),
        );
        bus.subscribe(MessageChannel::GENERAL, by_object.as_ref(), SubscribeFilter::any())
            .expect("Failed to subscribe.");

        bus.stop();
        assert!(bus.post_message_to_channel(
            MessageChannel::GENERAL,
            None,
            Message::new(MessageType::General)
        ));
        assert_eq!(bus.buffered_len(), 3);

        assert!(bus.unsubscribe(handle));
        assert_eq!(bus.buffered_len(), 2);
        assert_eq!(bus.object_footprint(by_handle.as_ref()).buffered, 0);

        assert!(bus.unsubscribe_handles(&handles));
        assert_eq!(bus.buffered_len(), 1);
        assert_eq!(bus.object_footprint(by_handles.as_ref()).buffered, 0);

        bus.unsubscribe_object(by_object.as_ref());
        assert_eq!(bus.buffered_len(), 0);
        assert_eq!(bus.object_footprint(by_object.as_ref()).buffered, 0);

        bus.start();
        tokio::time::sleep(SETTLE).await;
        for recorder in [&by_handle, &by_handles, &by_object] {
            assert!(recorder.received().is_empty());
        }
    }

    #[tokio::test]
    async fn blocking_is_reference_counted() {
        let bus = MessageBus::new_and_bootstrap(BusConfig::default())
            .expect("Failed to create bus.");

        assert!(matches!(
            bus.block_channel_message_type(USER_CHANNEL, MessageType::Progress),
            Err(CourierError::ContractViolation(_))
        ));
        assert!(matches!(
            bus.unblock_channel_message_type(MessageChannel::GENERAL, MessageType::Progress),
            Err(CourierError::ContractViolation(_))
        ));

        for _ in 0..2 {
            bus.block_channel_message_type(MessageChannel::GENERAL, MessageType::Progress)
                .expect("Failed to block.");
        }
        assert_eq!(
            bus.blocked_channel_message_types(MessageChannel::GENERAL),
            vec![MessageType::Progress]
        );

        assert_eq!(
            bus.unblock_channel_message_type(MessageChannel::GENERAL, MessageType::Progress)
                .expect("Failed to unblock."),
            1
        );
        assert_eq!(
            bus.unblock_channel_message_type(MessageChannel::GENERAL, MessageType::Progress)
                .expect("Failed to unblock."),
            0
        );
        assert!(bus
            .blocked_channel_message_types(MessageChannel::GENERAL)
            .is_empty());
    }
}
