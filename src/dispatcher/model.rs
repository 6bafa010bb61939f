//! The message bus model and its shared state.
//!

use fxhash::{FxHashMap, FxHashSet};
use std::{
    collections::VecDeque,
    sync::{atomic::AtomicBool, Arc, Mutex, MutexGuard, OnceLock, Weak},
};
use tokio::sync::Notify;

use super::{
    channels::{ChannelInfo, SubscribeInfo},
    delivery::Mailbox,
    sync::ReplyCollector,
};
use crate::{
    handler::ObjectKey, logger, postbox::PostBox, BusConfig, CourierError, InboundMessageHandler,
    Message, MessageChannel, MessageId, SubscribeHandle, Uid,
};

/// A receiver registered under a [`Uid`].
///
/// The bus never owns the receiver itself, only a weak reference to it.
pub(crate) struct ObjectInfo {
    pub(crate) key: ObjectKey,
    pub(crate) uid: Uid,
    pub(crate) receiver: Weak<dyn InboundMessageHandler>,
    pub(crate) advanced: bool,

    /// Description used in debug traces, built at registration.
    pub(crate) description: String,

    pub(crate) mailbox: Arc<Mailbox>,
}

impl std::fmt::Debug for ObjectInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectInfo")
            .field("key", &self.key)
            .field("uid", &self.uid)
            .field("advanced", &self.advanced)
            .field("description", &self.description)
            .finish()
    }
}

/// A message waiting in the buffer for the next flush.
#[derive(Debug, Clone)]
pub(crate) struct BufferEntry {
    pub(crate) sender: Arc<ObjectInfo>,
    pub(crate) receiver: Arc<ObjectInfo>,

    /// Set for channel posts only.
    pub(crate) channel: Option<MessageChannel>,
    pub(crate) subscribe_handle: Option<SubscribeHandle>,
    pub(crate) message: Arc<Message>,
}

/// A message past admission, about to be handed to its receiver's mailbox.
#[derive(Debug)]
pub(crate) struct QueueEntry {
    pub(crate) sender: Arc<ObjectInfo>,
    pub(crate) receiver: Arc<ObjectInfo>,
    pub(crate) channel: Option<MessageChannel>,
    pub(crate) subscribe_handle: Option<SubscribeHandle>,
    pub(crate) message: Arc<Message>,
}

impl From<BufferEntry> for QueueEntry {
    fn from(entry: BufferEntry) -> Self {
        Self {
            sender: entry.sender,
            receiver: entry.receiver,
            channel: entry.channel,
            subscribe_handle: entry.subscribe_handle,
            message: entry.message,
        }
    }
}

/// Everything the bus guards with its single lock.
#[derive(Debug, Default)]
pub(crate) struct BusState {
    pub(crate) objects: FxHashMap<ObjectKey, Arc<ObjectInfo>>,

    /// Keys of the objects registered under each uid, in registration order.
    pub(crate) objects_by_uid: FxHashMap<Uid, Vec<ObjectKey>>,

    pub(crate) channels: FxHashMap<MessageChannel, ChannelInfo>,
    pub(crate) subscriptions: FxHashMap<SubscribeHandle, SubscribeInfo>,

    pub(crate) buffer: VecDeque<BufferEntry>,
    pub(crate) queue: VecDeque<QueueEntry>,

    /// Objects that were handed a message but have not confirmed it yet.
    pub(crate) not_delivered: FxHashMap<MessageId, Vec<ObjectKey>>,

    pub(crate) enabled_receivers: FxHashSet<Uid>,
    pub(crate) stop_count: usize,
}

impl BusState {
    /// All registered objects bound to `uid` whose receiver is still alive, in
    /// registration order.
    pub(crate) fn objects_of(&self, uid: &Uid) -> Vec<Arc<ObjectInfo>> {
        self.objects_by_uid
            .get(uid)
            .map(|keys| {
                keys.iter()
                    .filter_map(|key| self.objects.get(key))
                    .filter(|info| info.receiver.strong_count() > 0)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Registered objects bound to `uid` whose receiver has been dropped.
    pub(crate) fn dropped_objects_of(&self, uid: &Uid) -> Vec<Arc<ObjectInfo>> {
        self.objects_by_uid
            .get(uid)
            .map(|keys| {
                keys.iter()
                    .filter_map(|key| self.objects.get(key))
                    .filter(|info| info.receiver.strong_count() == 0)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A process-local, typed and filtered message bus.
///
/// The bus is always held in an [`Arc`]; create one with [`Self::new`] inside a
/// tokio runtime and call [`Self::bootstrap`] before sending synchronously.
///
/// ```no_run
/// use courier::{BusConfig, MessageBus};
///
/// # async fn demo() -> Result<(), courier::CourierError> {
/// let bus = MessageBus::new_and_bootstrap(BusConfig::default())?;
/// assert!(bus.is_bootstrapped());
/// bus.shutdown();
/// # Ok(())
/// # }
/// ```
pub struct MessageBus {
    pub(crate) config: BusConfig,

    /// The runtime every task of the bus is spawned on.
    pub(crate) runtime: tokio::runtime::Handle,

    pub(crate) state: Mutex<BusState>,

    /// Outstanding synchronous calls.
    pub(crate) postbox: Arc<PostBox>,

    /// The receiver registered under [`Uid::MESSAGE_DISPATCHER`], collecting
    /// replies to synchronous calls.
    pub(crate) collector: Arc<ReplyCollector>,

    pub(crate) bootstrapped: AtomicBool,
    pub(crate) shut_down: AtomicBool,

    /// The handle of the flush task.
    pub(crate) flush_handle: OnceLock<tokio::task::JoinHandle<()>>,

    /// Arms the flush task. A single stored permit coalesces repeated arming.
    pub(crate) flush_flag: Arc<Notify>,

    /// A flag to signal termination of the flush task.
    pub(crate) terminate_flag: Arc<Notify>,

    /// A weak reference to itself, for spawning tasks that refer back to the bus
    /// without keeping it alive.
    pub(crate) weak_self: Weak<Self>,
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("config", &self.config)
            .field("bootstrapped", &self.is_bootstrapped())
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

impl MessageBus {
    /// Create a new message bus on the current tokio runtime.
    ///
    /// Fails with [`CourierError::NoRuntime`] outside of a runtime, and with
    /// [`CourierError::InvalidConfig`] if `config` does not validate.
    pub fn new(config: BusConfig) -> Result<Arc<Self>, CourierError> {
        let config = config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| CourierError::NoRuntime(err.to_string()))?;
        let postbox = PostBox::new_arc();
        let collector = Arc::new(ReplyCollector::new(Arc::clone(&postbox)));

        Ok(Arc::new_cyclic(|weak_self| Self {
            config,
            runtime,
            state: Mutex::new(BusState::default()),
            postbox,
            collector,
            bootstrapped: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            flush_handle: OnceLock::new(),
            flush_flag: Arc::new(Notify::new()),
            terminate_flag: Arc::new(Notify::new()),
            weak_self: weak_self.clone(),
        }))
    }

    /// Create a new message bus and bootstrap it.
    pub fn new_and_bootstrap(config: BusConfig) -> Result<Arc<Self>, CourierError> {
        let bus = Self::new(config)?;
        bus.bootstrap()?;

        Ok(bus)
    }

    /// The configuration of this bus.
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Lock the shared state.
    pub(crate) fn state(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(ignore_poison!("message bus state"))
    }

    /// Bootstrap the bus.
    ///
    /// Registers the reserved channels and the reply collector, and starts the
    /// flush task. Calling this again is a no-op.
    pub fn bootstrap(&self) -> Result<(), CourierError> {
        if self.is_shut_down() {
            return Err(CourierError::ShutDown);
        }

        if self
            .bootstrapped
            .swap(true, std::sync::atomic::Ordering::AcqRel)
        {
            return Ok(());
        }

        for channel in MessageChannel::RESERVED {
            self.register_channel(channel);
        }

        let collector: crate::Receiver = self.collector.clone();
        self.register_object(Uid::MESSAGE_DISPATCHER, collector);

        self.spawn_flush_task();

        if !self.state().buffer.is_empty() {
            self.arm_flush();
        }

        logger::info!("Message bus bootstrapped.");
        Ok(())
    }

    /// Whether [`Self::bootstrap`] has been called.
    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped.load(std::sync::atomic::Ordering::Acquire)
    }

    pub(crate) fn ensure_bootstrapped(&self) -> Result<(), CourierError> {
        if self.is_shut_down() {
            Err(CourierError::ShutDown)
        } else if !self.is_bootstrapped() {
            Err(CourierError::NotBootstrapped)
        } else {
            Ok(())
        }
    }
}
