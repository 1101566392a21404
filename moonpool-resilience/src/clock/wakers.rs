//! Waker bookkeeping for sleeps parked on the clock.

use std::collections::HashMap;
use std::task::Waker;

#[derive(Debug)]
enum SleepState {
    /// Timer not yet fired; holds the waker from the latest poll.
    Pending(Option<Waker>),
    /// Timer fired but the sleep has not observed it yet.
    Fired,
}

/// Tracks every live sleep by id.
///
/// A sleep is registered when created and removed once it completes or is
/// dropped. Timers firing for an id that is no longer registered are ignored.
#[derive(Debug, Default)]
pub(crate) struct SleepRegistry {
    sleeps: HashMap<u64, SleepState>,
}

impl SleepRegistry {
    pub(crate) fn register(&mut self, sleep_id: u64) {
        self.sleeps.insert(sleep_id, SleepState::Pending(None));
    }

    /// Marks the sleep as fired and hands back the waker to notify, if any.
    pub(crate) fn fire(&mut self, sleep_id: u64) -> Option<Waker> {
        let state = self.sleeps.get_mut(&sleep_id)?;
        match std::mem::replace(state, SleepState::Fired) {
            SleepState::Pending(waker) => waker,
            SleepState::Fired => None,
        }
    }

    /// Returns `true` and forgets the sleep once its timer fired, otherwise
    /// stores the waker for a later wake-up.
    pub(crate) fn poll_fired(&mut self, sleep_id: u64, waker: &Waker) -> bool {
        match self.sleeps.get_mut(&sleep_id) {
            Some(SleepState::Fired) => {
                self.sleeps.remove(&sleep_id);
                true
            }
            Some(SleepState::Pending(slot)) => {
                *slot = Some(waker.clone());
                false
            }
            None => {
                self.sleeps
                    .insert(sleep_id, SleepState::Pending(Some(waker.clone())));
                false
            }
        }
    }

    pub(crate) fn cancel(&mut self, sleep_id: u64) {
        self.sleeps.remove(&sleep_id);
    }

    /// Forgets every sleep, fired or not.
    pub(crate) fn clear(&mut self) {
        self.sleeps.clear();
    }

    /// Number of sleeps still waiting for their timer.
    pub(crate) fn parked(&self) -> usize {
        self.sleeps
            .values()
            .filter(|state| matches!(state, SleepState::Pending(_)))
            .count()
    }
}
