//! The unit of simulated work.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use serde::Serialize;

use crate::{
    clock::Tick,
    context::SimContext,
    error::Failure,
    stats::{ResponseTiming, TimeStats},
};

/// Successful payload of a stage. Success need not carry data.
pub type Payload = Option<String>;

/// Result of handing an event to a stage.
pub type Outcome = Result<Payload, Failure>;

/// Terminal kind of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    /// The pipeline succeeded.
    Success,
    /// The pipeline failed.
    Fail,
}

/// Terminal response recorded on an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Response {
    /// Success or failure.
    pub kind: ResponseKind,
    /// Payload reported by the outermost stage.
    pub payload: Option<String>,
}

impl Response {
    /// Returns `true` for a successful response.
    pub fn is_success(&self) -> bool {
        self.kind == ResponseKind::Success
    }
}

impl From<&Outcome> for Response {
    fn from(outcome: &Outcome) -> Self {
        match outcome {
            Ok(payload) => Response {
                kind: ResponseKind::Success,
                payload: payload.clone(),
            },
            Err(failure) => Response {
                kind: ResponseKind::Fail,
                payload: Some(failure.message()),
            },
        }
    }
}

#[derive(Debug)]
struct EventInner {
    id: u64,
    key: String,
    stage_times: RefCell<Vec<TimeStats>>,
    response: RefCell<Option<Response>>,
    timing: Cell<ResponseTiming>,
}

/// A request travelling through the stage pipeline.
///
/// Cloning yields another handle to the same event. Two events with the same
/// key are identical requests from possibly different sources.
#[derive(Debug, Clone)]
pub struct Event {
    inner: Rc<EventInner>,
}

impl Event {
    /// Creates an event with the next id of `ctx`, started at the current tick.
    pub fn new(ctx: &SimContext, key: impl Into<String>) -> Self {
        let start = ctx.clock().now();
        Self {
            inner: Rc::new(EventInner {
                id: ctx.next_event_id(),
                key: key.into(),
                stage_times: RefCell::new(Vec::new()),
                response: RefCell::new(None),
                timing: Cell::new(ResponseTiming { start, end: start }),
            }),
        }
    }

    /// Unique id, increasing in creation order.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Key used by caches.
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Per-stage timings, outermost stage first.
    pub fn stage_times(&self) -> Vec<TimeStats> {
        self.inner.stage_times.borrow().clone()
    }

    /// Terminal response, absent while in flight.
    pub fn response(&self) -> Option<Response> {
        self.inner.response.borrow().clone()
    }

    /// End-to-end timing.
    pub fn timing(&self) -> ResponseTiming {
        self.inner.timing.get()
    }

    pub(crate) fn push_stage_time(&self, time: TimeStats) -> usize {
        let mut times = self.inner.stage_times.borrow_mut();
        times.push(time);
        times.len() - 1
    }

    pub(crate) fn update_stage_time(&self, index: usize, update: impl FnOnce(&mut TimeStats)) {
        if let Some(time) = self.inner.stage_times.borrow_mut().get_mut(index) {
            update(time);
        }
    }

    /// Records the terminal response and the tick it arrived.
    pub fn complete(&self, outcome: &Outcome, now: Tick) {
        *self.inner.response.borrow_mut() = Some(Response::from(outcome));
        let mut timing = self.inner.timing.get();
        timing.end = now;
        self.inner.timing.set(timing);
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Event {}
