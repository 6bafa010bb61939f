//! The identity registry: binding receivers to uids.
//!

use std::sync::Arc;

use super::{delivery::Mailbox, BusState, MessageBus, ObjectInfo};
use crate::{handler::ObjectKey, logger, InboundMessageHandler, Receiver, Uid};

/// Describe a receiver for debug traces.
fn describe(uid: &Uid, receiver: &dyn InboundMessageHandler) -> String {
    match receiver.owner_name() {
        Some(owner) if !owner.is_empty() => format!("{}, {owner}", uid.to_printable()),
        _ => uid.to_printable(),
    }
}

impl MessageBus {
    /// Register `receiver` under `uid`.
    ///
    /// Several receivers may share one uid, but a receiver can only be
    /// registered once; registering it again returns `false` and changes
    /// nothing. The bus keeps only a weak reference to `receiver`.
    pub fn register_object(&self, uid: Uid, receiver: Receiver) -> bool {
        self.register(uid, receiver, false)
    }

    /// Register `receiver` under `uid`, also invoking its
    /// [`InboundMessageHandler::inbound_message_advanced`] on every delivery.
    pub fn register_object_with_advanced(&self, uid: Uid, receiver: Receiver) -> bool {
        self.register(uid, receiver, true)
    }

    fn register(&self, uid: Uid, receiver: Receiver, advanced: bool) -> bool {
        if self.is_shut_down() {
            logger::warn!("Refusing to register {uid} on a message bus that has been shut down.");
            return false;
        }

        let key = ObjectKey::of(receiver.as_ref());
        let description = describe(&uid, receiver.as_ref());

        let mut state = self.state();

        if let Some(existing) = state.objects.get(&key) {
            if existing.receiver.strong_count() > 0 {
                logger::debug!("{} is already registered as {}.", description, existing.uid);
                return false;
            }

            // The previous owner of this address was dropped without unregistering.
            let stale = Arc::clone(existing);
            logger::debug!("Purging stale registration of {}.", stale.description);
            self.purge_object(&mut state, &stale);
        }

        let mailbox = Mailbox::spawn(
            &self.runtime,
            self.weak_self.clone(),
            key,
            Arc::downgrade(&receiver),
            advanced,
        );

        let info = Arc::new(ObjectInfo {
            key,
            uid: uid.clone(),
            receiver: Arc::downgrade(&receiver),
            advanced,
            description,
            mailbox,
        });

        logger::debug!("Registered {}.", info.description);
        state.objects.insert(key, info);
        state.objects_by_uid.entry(uid).or_default().push(key);
        drop(state);

        true
    }

    /// Unregister `receiver`.
    ///
    /// Removes its subscriptions and every buffered, queued or unconfirmed
    /// message addressed to it. Returns `false` if it was not registered.
    pub fn unregister_object(&self, receiver: &dyn InboundMessageHandler) -> bool {
        self.unregister_key(ObjectKey::of(receiver))
    }

    pub(crate) fn unregister_key(&self, key: ObjectKey) -> bool {
        let mut state = self.state();

        let Some(info) = state.objects.get(&key).cloned() else {
            return false;
        };

        self.purge_object(&mut state, &info);
        drop(state);

        logger::debug!("Unregistered {}.", info.description);
        true
    }

    /// Remove every trace of `info` from `state`, and stop its mailbox.
    pub(crate) fn purge_object(&self, state: &mut BusState, info: &Arc<ObjectInfo>) {
        let key = info.key;

        let handles = state
            .channels
            .values()
            .flat_map(|channel| channel.handles_of(key))
            .collect::<Vec<_>>();
        for handle in handles {
            Self::remove_subscription(state, handle);
        }

        state.objects.remove(&key);
        if let Some(keys) = state.objects_by_uid.get_mut(&info.uid) {
            keys.retain(|other| *other != key);
            if keys.is_empty() {
                state.objects_by_uid.remove(&info.uid);
            }
        }

        state.buffer.retain(|entry| entry.receiver.key != key);
        state.queue.retain(|entry| entry.receiver.key != key);
        state.not_delivered.retain(|_, receivers| {
            receivers.retain(|other| *other != key);
            !receivers.is_empty()
        });

        info.mailbox.terminate();
    }

    /// Whether `receiver` is registered.
    pub fn is_object_registered(&self, receiver: &dyn InboundMessageHandler) -> bool {
        self.state().objects.contains_key(&ObjectKey::of(receiver))
    }

    /// Purge the registrations under `uid` whose receiver has been dropped.
    pub(crate) fn purge_dropped(&self, state: &mut BusState, uid: &Uid) {
        for info in state.dropped_objects_of(uid) {
            logger::debug!("Purging {} after its receiver was dropped.", info.description);
            self.purge_object(state, &info);
        }
    }

    /// Whether any live receiver is registered under `uid`.
    pub fn is_uid_registered(&self, uid: &Uid) -> bool {
        let mut state = self.state();
        self.purge_dropped(&mut state, uid);

        state.objects_by_uid.contains_key(uid)
    }

    /// The uid `receiver` is registered under.
    pub fn object_uid(&self, receiver: &dyn InboundMessageHandler) -> Option<Uid> {
        self.state()
            .objects
            .get(&ObjectKey::of(receiver))
            .map(|info| info.uid.clone())
    }

    /// The live receivers registered under `uid`, in registration order.
    ///
    /// An empty list means there is no such endpoint.
    pub fn objects(&self, uid: &Uid) -> Vec<Receiver> {
        let weak_receivers = self
            .state()
            .objects_of(uid)
            .into_iter()
            .map(|info| info.receiver.clone())
            .collect::<Vec<_>>();

        // Upgraded outside of the lock, so that dropping them never runs user code
        // while the state is held.
        weak_receivers
            .into_iter()
            .filter_map(|receiver| receiver.upgrade())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        _tests::{Recorder, ALPHA, BETA, GAMMA},
        BusConfig, Message, MessageChannel, MessageType, SubscribeFilter,
    };

    #[tokio::test]
    async fn double_registration_is_rejected() {
        let bus = MessageBus::new_and_bootstrap(BusConfig::default())
            .expect("Failed to create bus.");
        let recorder = Recorder::new_arc();

        assert!(bus.register_object(ALPHA, recorder.clone()));
        assert!(!bus.register_object(ALPHA, recorder.clone()));
        assert!(!bus.register_object(BETA, recorder.clone()));

        assert_eq!(bus.object_uid(recorder.as_ref()), Some(ALPHA));
        assert_eq!(bus.objects(&ALPHA).len(), 1);
        assert!(!bus.is_uid_registered(&BETA));
    }

    #[tokio::test]
    async fn shared_uid_keeps_registration_order() {
        let bus = MessageBus::new_and_bootstrap(BusConfig::default())
            .expect("Failed to create bus.");
        let first = Recorder::new_arc();
        let second = Recorder::new_arc();

        assert!(bus.register_object(ALPHA, first.clone()));
        assert!(bus.register_object(ALPHA, second.clone()));

        let objects = bus.objects(&ALPHA);
        assert_eq!(objects.len(), 2);
        assert_eq!(ObjectKey::of(objects[0].as_ref()), ObjectKey::of(first.as_ref()));
        assert_eq!(ObjectKey::of(objects[1].as_ref()), ObjectKey::of(second.as_ref()));

        assert!(bus.unregister_object(first.as_ref()));
        assert!(!bus.unregister_object(first.as_ref()));
        assert_eq!(bus.objects(&ALPHA).len(), 1);
        assert!(bus.is_uid_registered(&ALPHA));

        assert!(bus.unregister_object(second.as_ref()));
        assert!(!bus.is_uid_registered(&ALPHA));
    }

    #[tokio::test]
    async fn unregistration_drops_subscriptions() {
        let bus = MessageBus::new_and_bootstrap(BusConfig::default())
            .expect("Failed to create bus.");
        let recorder = Recorder::new_arc();

        assert!(bus.register_object(ALPHA, recorder.clone()));
        let handle = bus
            .subscribe(MessageChannel::GENERAL, recorder.as_ref(), SubscribeFilter::any())
            .expect("Failed to subscribe.");
        assert!(bus.has_subscribers(MessageChannel::GENERAL));

        assert!(bus.unregister_object(recorder.as_ref()));
        assert!(!bus.has_subscribers(MessageChannel::GENERAL));
        assert!(!bus.unsubscribe(handle));
    }

    #[tokio::test]
    async fn dropped_receiver_is_not_listed() {
        let bus = MessageBus::new_and_bootstrap(BusConfig::default())
            .expect("Failed to create bus.");

        let sender = Recorder::new_arc();
        assert!(bus.register_object(GAMMA, sender.clone()));

        let recorder = Recorder::new_arc();
        assert!(bus.register_object(ALPHA, recorder.clone()));
        drop(recorder);

        assert!(bus.objects(&ALPHA).is_empty());
        assert!(!bus.post_message(
            sender.as_ref(),
            &ALPHA,
            Message::new(MessageType::General)
        ));
        assert!(!bus.is_uid_registered(&ALPHA));
        assert_eq!(bus.buffered_len(), 0);

        let live = Recorder::new_arc();
        assert!(bus.register_object(BETA, live.clone()));
        assert!(bus.is_uid_registered(&BETA));
    }
}
