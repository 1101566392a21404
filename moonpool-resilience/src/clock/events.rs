use std::{cmp::Ordering, collections::BinaryHeap, fmt};

use super::Tick;

/// Work the clock performs when a scheduled entry comes due.
pub(crate) enum Scheduled {
    /// Wake the sleep registered under this id.
    Timer {
        /// The sleep to wake.
        sleep_id: u64,
    },
    /// Run a one-shot callback.
    Callback(Box<dyn FnOnce()>),
}

impl fmt::Debug for Scheduled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheduled::Timer { sleep_id } => f
                .debug_struct("Timer")
                .field("sleep_id", sleep_id)
                .finish(),
            Scheduled::Callback(_) => f.write_str("Callback"),
        }
    }
}

/// An entry due at a specific tick.
#[derive(Debug)]
pub(crate) struct ScheduledEntry {
    tick: Tick,
    sequence: u64, // registration order among entries due at the same tick
    work: Scheduled,
}

impl ScheduledEntry {
    pub(crate) fn new(tick: Tick, work: Scheduled, sequence: u64) -> Self {
        Self {
            tick,
            sequence,
            work,
        }
    }

    pub(crate) fn tick(&self) -> Tick {
        self.tick
    }

    pub(crate) fn into_work(self) -> Scheduled {
        self.work
    }
}

impl PartialEq for ScheduledEntry {
    fn eq(&self, other: &Self) -> bool {
        self.tick == other.tick && self.sequence == other.sequence
    }
}

impl Eq for ScheduledEntry {}

impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max heap, reverse both keys so the earliest tick
        // and then the earliest registration pops first.
        match other.tick.cmp(&self.tick) {
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            other => other,
        }
    }
}

/// Pending callbacks ordered by due tick, then registration order.
#[derive(Debug, Default)]
pub(crate) struct CallbackQueue {
    heap: BinaryHeap<ScheduledEntry>,
}

impl CallbackQueue {
    pub(crate) fn schedule(&mut self, entry: ScheduledEntry) {
        self.heap.push(entry);
    }

    /// Removes the earliest entry if it is due at or before `now`.
    pub(crate) fn pop_due(&mut self, now: Tick) -> Option<ScheduledEntry> {
        match self.heap.peek() {
            Some(entry) if entry.tick() <= now => self.heap.pop(),
            _ => None,
        }
    }

    pub(crate) fn earliest_tick(&self) -> Option<Tick> {
        self.heap.peek().map(ScheduledEntry::tick)
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

}
