use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

/// How repeated writes to a named line combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    /// Values are summed.
    Add,
    /// The largest value is kept.
    Max,
}

#[derive(Debug, Clone, Serialize)]
struct Line {
    kind: LineKind,
    value: f64,
    calls: u64,
}

#[derive(Debug, Default)]
struct StatsTable {
    lines: BTreeMap<String, Line>,
    series: BTreeMap<String, Vec<Value>>,
}

/// Named counters and time series shared by everything in a run.
///
/// Stages write to it; reading is for reporting and tests.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    table: Rc<RefCell<StatsTable>>,
}

impl Stats {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `value` to the line `name`.
    pub fn add(&self, name: &str, value: f64) {
        let mut table = self.table.borrow_mut();
        let line = table.lines.entry(name.to_string()).or_insert(Line {
            kind: LineKind::Add,
            value: 0.0,
            calls: 0,
        });
        line.value += value;
        line.calls += 1;
    }

    /// Keeps the largest value seen for the line `name`.
    pub fn max(&self, name: &str, value: f64) {
        let mut table = self.table.borrow_mut();
        let line = table.lines.entry(name.to_string()).or_insert(Line {
            kind: LineKind::Max,
            value: 0.0,
            calls: 0,
        });
        line.value = line.value.max(value);
        line.calls += 1;
    }

    /// Appends a sample to the time series `name`.
    pub fn record<T: Serialize>(&self, name: &str, sample: &T) {
        match serde_json::to_value(sample) {
            Ok(value) => self
                .table
                .borrow_mut()
                .series
                .entry(name.to_string())
                .or_default()
                .push(value),
            Err(err) => warn!(series = name, error = %err, "dropping unserializable sample"),
        }
    }

    /// Current value of a line, 0 if never written.
    pub fn get(&self, name: &str) -> f64 {
        self.table
            .borrow()
            .lines
            .get(name)
            .map_or(0.0, |line| line.value)
    }

    /// How many times a line was written.
    pub fn calls(&self, name: &str) -> u64 {
        self.table
            .borrow()
            .lines
            .get(name)
            .map_or(0, |line| line.calls)
    }

    /// Kind of a line, if it exists.
    pub fn kind(&self, name: &str) -> Option<LineKind> {
        self.table.borrow().lines.get(name).map(|line| line.kind)
    }

    /// Samples recorded under `name`, oldest first.
    pub fn recorded(&self, name: &str) -> Vec<Value> {
        self.table
            .borrow()
            .series
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Clears every line and series.
    pub fn reset(&self) {
        let mut table = self.table.borrow_mut();
        table.lines.clear();
        table.series.clear();
    }
}
