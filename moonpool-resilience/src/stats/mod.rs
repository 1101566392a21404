//! Statistics: per-stage records and the run-wide sink.

mod sink;
mod stage;

pub use sink::{LineKind, Stats};
pub use stage::{ResponseTiming, TimeStats, TrafficStats};
