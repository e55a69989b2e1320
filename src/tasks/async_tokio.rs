//! Async variants of the polling waits.
//!
//! Completion is still detected by non-blocking reaps; the only change is
//! that the fixed poll interval is slept with `tokio::time::sleep` instead
//! of parking the thread.

use crate::{
    helper::tracing::MaybeInstrument,
    tasks::{
        config::RunOptions,
        error::TaskError,
        runner::{Runner, WorkUnit},
        task::Task,
    },
};

impl Task {
    /// Waits for the child to exit without blocking the runtime.
    ///
    /// Returns `false` if the task captured an error, `true` otherwise.
    pub async fn join(&self) -> bool {
        let core = &self.core;
        async {
            loop {
                if core.poll() {
                    return core.succeeded();
                }
                tokio::time::sleep(core.poll_interval).await;
            }
        }
        .maybe_instrument("join", self.id())
        .await
    }
}

impl Runner {
    /// Async [`run`](Runner::run): admission control sleeps on the runtime.
    ///
    /// The fork and handshake themselves still happen on the calling thread.
    pub async fn run_async(&self, work: WorkUnit, options: RunOptions) -> Result<Task, TaskError> {
        let resolved = self.prepare(&work, &options)?;
        if !resolved.forced {
            let interval = self.config().poll_interval();
            while !self.has_capacity() {
                tokio::time::sleep(interval).await;
            }
        }
        let task = Task::new(self.spawn_core(work, &resolved, !resolved.untracked, true)?);
        if resolved.wait {
            task.join().await;
        }
        Ok(task)
    }

    /// Async [`wait`](Runner::wait): resolves once no tracked task is running.
    pub async fn idle(&self) {
        let interval = self.config().poll_interval();
        loop {
            self.reap_finished();
            if self.tracked_count() == 0 {
                return;
            }
            tokio::time::sleep(interval).await;
        }
    }
}
