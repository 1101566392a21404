use std::{fmt, rc::Rc};

use super::Stage;
use crate::event::{Event, Outcome};

/// Holds the single inner stage a resilience technique wraps.
#[derive(Clone)]
pub struct Wrapped {
    inner: Rc<dyn Stage>,
}

impl Wrapped {
    /// Wraps `inner`.
    pub fn new(inner: Rc<dyn Stage>) -> Self {
        Self { inner }
    }

    /// The wrapped stage.
    pub fn inner(&self) -> &Rc<dyn Stage> {
        &self.inner
    }

    /// Hands `event` to the wrapped stage.
    pub async fn delegate(&self, event: &Event) -> Outcome {
        self.inner.accept(event).await
    }
}

impl fmt::Debug for Wrapped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Wrapped").field(&self.inner.name()).finish()
    }
}
