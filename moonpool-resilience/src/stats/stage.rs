use serde::Serialize;

use crate::clock::Tick;

/// Time an event spent in one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TimeStats {
    /// Name of the stage.
    pub stage: String,
    /// Ticks spent waiting for a worker.
    pub queue_time: Tick,
    /// Ticks spent in the stage's domain logic.
    pub work_time: Tick,
}

impl TimeStats {
    /// Empty record for the named stage.
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            queue_time: 0,
            work_time: 0,
        }
    }
}

/// Per-stage traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrafficStats {
    /// Events that reached admission control.
    pub admitted: u64,
    /// Events turned away before any work was done.
    pub rejected: u64,
    /// Events handed to domain logic.
    pub dispatched: u64,
    /// Events that completed successfully.
    pub succeeded: u64,
    /// Events whose domain logic failed.
    pub failed: u64,
}

/// Start and end tick of an event's trip through the whole pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResponseTiming {
    /// Tick the event was created.
    pub start: Tick,
    /// Tick the event reached a terminal response.
    pub end: Tick,
}

impl ResponseTiming {
    /// End-to-end latency.
    pub fn latency(&self) -> Tick {
        self.end.saturating_sub(self.start)
    }
}
