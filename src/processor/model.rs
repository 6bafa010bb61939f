//! The message processor model.
//!

use fxhash::FxHashMap;
use std::{
    hash::Hash,
    sync::{Arc, Mutex, MutexGuard, Weak},
};
use tokio::sync::mpsc;

use super::ProcessorEvent;
use crate::{
    logger, CourierError, InboundMessageHandler, Message, MessageBus, MessageId, SubscribeHandle,
    Uid,
};

/// A request waiting to be posted, or posted and waiting for its reply.
#[derive(Debug, Clone)]
struct Request<K> {
    key: K,
    receiver: Uid,
    message: Message,

    /// Keys that must be idle before this request is posted.
    queue_keys: Vec<K>,
}

#[derive(Debug)]
struct ProcessorState<K> {
    /// Requests not posted yet, in the order they were added.
    queue: Vec<Request<K>>,

    /// Posted requests waiting for their reply.
    pending: FxHashMap<K, Request<K>>,

    message_keys: FxHashMap<MessageId, K>,
}

impl<K> Default for ProcessorState<K> {
    fn default() -> Self {
        Self {
            queue: Vec::new(),
            pending: FxHashMap::default(),
            message_keys: FxHashMap::default(),
        }
    }
}

impl<K> ProcessorState<K>
where
    K: Eq + Hash,
{
    fn in_queue(&self, key: &K) -> bool {
        self.queue.iter().any(|request| &request.key == key)
    }

    fn is_busy(&self, key: &K) -> bool {
        self.in_queue(key) || self.pending.contains_key(key)
    }
}

/// Posts keyed requests and tracks their replies.
///
/// The processor registers itself on the bus under the uid it is created with,
/// usually the uid of its owner, so that replies addressed to the owner reach it.
/// Adding a request under a key that is already queued replaces the queued one;
/// once a newer request for a key has been posted, the reply to the older one
/// is ignored.
///
/// A request can name `queue_keys`: it is held back while any of those keys has
/// a queued or pending request.
///
/// The processor unregisters itself when dropped.
pub struct MessageProcessor<K> {
    bus: Weak<MessageBus>,
    uid: Uid,
    state: Mutex<ProcessorState<K>>,
    events: mpsc::UnboundedSender<ProcessorEvent<K>>,
}

impl<K> MessageProcessor<K>
where
    K: Clone + Eq + Hash + std::fmt::Debug + Send + Sync + 'static,
{
    /// Create a processor registered under `uid`, along with the receiving end
    /// of its events.
    pub fn new(
        bus: &Arc<MessageBus>,
        uid: Uid,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<ProcessorEvent<K>>), CourierError> {
        let (events, receiver) = mpsc::unbounded_channel();

        let processor = Arc::new(Self {
            bus: Arc::downgrade(bus),
            uid: uid.clone(),
            state: Mutex::new(ProcessorState::default()),
            events,
        });

        if !bus.register_object(uid, processor.clone()) {
            return Err(if bus.is_shut_down() {
                CourierError::ShutDown
            } else {
                CourierError::ContractViolation(format!(
                    "Failed to register the message processor of {}.",
                    processor.uid
                ))
            });
        }

        Ok((processor, receiver))
    }

    /// The uid this processor is registered under.
    pub fn uid(&self) -> &Uid {
        &self.uid
    }

    fn state(&self) -> MutexGuard<'_, ProcessorState<K>> {
        self.state
            .lock()
            .unwrap_or_else(ignore_poison!(format!("message processor of {}", self.uid)))
    }

    fn bus(&self) -> Result<Arc<MessageBus>, CourierError> {
        self.bus.upgrade().ok_or(CourierError::ShutDown)
    }

    fn emit(&self, event: ProcessorEvent<K>) {
        if self.events.send(event).is_err() {
            logger::trace!("Message processor events of {} are not observed.", self.uid);
        }
    }

    /// Queue `message` for `receiver` under `key`.
    ///
    /// Returns `Ok(false)` if nothing is registered under `receiver`. A request
    /// that names its own key in `queue_keys` is a
    /// [`CourierError::ContractViolation`].
    pub fn add_message_request(
        &self,
        key: K,
        receiver: Uid,
        message: Message,
        queue_keys: Vec<K>,
    ) -> Result<bool, CourierError> {
        if queue_keys.contains(&key) {
            return Err(CourierError::ContractViolation(format!(
                "Request {key:?} cannot wait for itself."
            )));
        }

        let bus = self.bus()?;
        if !bus.is_uid_registered(&receiver) {
            logger::debug!("Ignoring request {:?}: {} is not registered.", key, receiver);
            return Ok(false);
        }

        let mut state = self.state();

        if !state.is_busy(&key) {
            self.emit(ProcessorEvent::StartWaiting(key.clone()));
        }

        let request = Request {
            key: key.clone(),
            receiver,
            message,
            queue_keys,
        };

        match state.queue.iter_mut().find(|queued| queued.key == key) {
            Some(queued) => *queued = request,
            None => {
                state.queue.push(request);
                self.emit(ProcessorEvent::RequestAdded(key));
            }
        }

        self.process_queue(&bus, &mut state);
        Ok(true)
    }

    /// Drop the queued or pending request of `key`; `false` if there was none.
    pub fn remove_message_request(&self, key: &K) -> bool {
        let mut state = self.state();

        if !state.is_busy(key) {
            return false;
        }

        state.queue.retain(|request| &request.key != key);
        state.pending.remove(key);
        state.message_keys.retain(|_, other| other != key);
        self.emit(ProcessorEvent::RequestRemoved(key.clone()));

        if let Ok(bus) = self.bus() {
            self.process_queue(&bus, &mut state);
        }

        true
    }

    /// Whether `key` has a queued or pending request.
    pub fn is_waiting_message_feedback(&self, key: &K) -> bool {
        self.state().is_busy(key)
    }

    /// Whether `key` has a request that has not been posted yet.
    pub fn in_queue(&self, key: &K) -> bool {
        self.state().in_queue(key)
    }

    /// Post every queued request whose queue keys are idle.
    fn process_queue(&self, bus: &MessageBus, state: &mut ProcessorState<K>) {
        let ready = state
            .queue
            .iter()
            .filter(|request| !request.queue_keys.iter().any(|other| state.is_busy(other)))
            .map(|request| request.key.clone())
            .collect::<Vec<_>>();

        for key in ready {
            let Some(position) = state.queue.iter().position(|request| request.key == key) else {
                continue;
            };
            let request = state.queue.remove(position);

            state.message_keys.retain(|_, other| *other != key);

            if !bus.post_message(self, &request.receiver, request.message.clone()) {
                logger::warn!(
                    "Failed to post request {:?} to {}; dropping it.",
                    key,
                    request.receiver
                );
                state.pending.remove(&key);
                self.emit(ProcessorEvent::FinishWaiting(key.clone()));
                self.emit(ProcessorEvent::RequestRemoved(key));
                continue;
            }

            logger::trace!("Posted request {:?} as {}.", key, request.message.id());
            state.message_keys.insert(request.message.id(), key.clone());
            state.pending.insert(key, request);
        }
    }
}

impl<K> InboundMessageHandler for MessageProcessor<K>
where
    K: Clone + Eq + Hash + std::fmt::Debug + Send + Sync + 'static,
{
    fn inbound_message(
        &self,
        bus: &MessageBus,
        _sender: &Uid,
        message: &Message,
        _subscribe_handle: Option<SubscribeHandle>,
    ) {
        bus.confirm_message_delivery(message, self);

        let Some(feedback_id) = message.feedback_id() else {
            return;
        };

        let mut state = self.state();

        let Some(key) = state.message_keys.remove(&feedback_id) else {
            return;
        };
        let Some(request) = state.pending.remove(&key) else {
            return;
        };

        self.emit(ProcessorEvent::Feedback {
            key: key.clone(),
            request: request.message,
            feedback: message.clone(),
        });
        self.emit(ProcessorEvent::FinishWaiting(key.clone()));
        self.emit(ProcessorEvent::RequestRemoved(key));

        self.process_queue(bus, &mut state);
    }

    fn owner_name(&self) -> Option<String> {
        Some("message processor".to_owned())
    }
}

impl<K> Drop for MessageProcessor<K> {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            let key = crate::handler::ObjectKey::from_address(self as *const Self as *const ());
            bus.unregister_key(key);
        }
    }
}
