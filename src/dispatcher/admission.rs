//! Admission control: the pause counter and the receiver allow-list.
//!

use fxhash::FxHashSet;

use super::MessageBus;
use crate::{logger, CourierError, Uid};

impl MessageBus {
    /// Pause flushing. Posted messages keep accumulating in the buffer.
    ///
    /// Pauses nest; every `stop` needs a matching [`Self::start`].
    pub fn stop(&self) {
        let mut state = self.state();

        state.stop_count += 1;
        logger::debug!("Message bus paused ({}).", state.stop_count);
    }

    /// Undo one [`Self::stop`]. Flushing resumes once every pause is undone.
    pub fn start(&self) {
        let mut state = self.state();

        if state.stop_count == 0 {
            logger::error!("Message bus started more often than it was stopped.");
            return;
        }

        state.stop_count -= 1;
        if state.stop_count == 0 {
            logger::debug!("Message bus resumed with {} buffered message(s).", state.buffer.len());
            if !state.buffer.is_empty() {
                self.arm_flush();
            }
        }
    }

    /// Whether flushing is running, i.e. no pause is in effect.
    pub fn is_started(&self) -> bool {
        self.state().stop_count == 0
    }

    /// Restrict flushing to the receivers registered under `uids`.
    ///
    /// An empty set lifts the restriction and releases the backlog. Switching
    /// directly from one non-empty set to a different one is a
    /// [`CourierError::ContractViolation`]: clear the allow-list first.
    pub fn set_enabled_receivers(
        &self,
        uids: impl IntoIterator<Item = Uid>,
    ) -> Result<(), CourierError> {
        let uids = uids.into_iter().collect::<FxHashSet<_>>();
        let mut state = self.state();

        if state.enabled_receivers == uids {
            return Ok(());
        }

        if !uids.is_empty() && !state.enabled_receivers.is_empty() {
            return Err(CourierError::ContractViolation(
                "The enabled receivers must be cleared before a different set is enabled."
                    .to_owned(),
            ));
        }

        logger::debug!("Enabled receivers set to {:?}.", uids);
        state.enabled_receivers = uids;

        if !state.buffer.is_empty() {
            self.arm_flush();
        }

        Ok(())
    }

    /// The current allow-list; empty when every receiver is enabled.
    pub fn enabled_receivers(&self) -> Vec<Uid> {
        let mut uids = self
            .state()
            .enabled_receivers
            .iter()
            .cloned()
            .collect::<Vec<_>>();
        uids.sort();

        uids
    }
}
