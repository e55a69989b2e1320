use std::future::Future;

#[cfg(feature = "tracing")]
use tracing::{Instrument, Level};

/// Wraps a future in a debug span when the `tracing` feature is enabled.
///
/// Used by the async waits so a subscriber can attribute polling time
/// to the task it belongs to.
pub trait MaybeInstrument: Future + Sized {
    #[cfg(feature = "tracing")]
    fn maybe_instrument(
        self,
        name: &'static str,
        task_id: u64,
    ) -> impl Future<Output = Self::Output> {
        let span = tracing::span!(Level::DEBUG, "isolate_wait", name = name, task_id = task_id);
        self.instrument(span)
    }

    #[cfg(not(feature = "tracing"))]
    fn maybe_instrument(self, _name: &'static str, _task_id: u64) -> Self {
        self
    }
}

impl<F: Future> MaybeInstrument for F {}
