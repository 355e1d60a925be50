//! Timeout-triggered cancellation.
//!
//! A [`Deadline`] arms a timer on the I/O executor that cancels a bridge
//! through its [`CancelHandle`] when it fires, exactly as if the consumer
//! had closed it. Computing the deadline is up to the caller.

use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::debug;

use crate::buffer::CancelHandle;
use crate::context::RequestContext;
use crate::offload::IoExecutor;

/// Armed timeout. Dropping it disarms the timer.
#[derive(Debug)]
#[must_use = "dropping a Deadline disarms it"]
pub struct Deadline {
    timer: JoinHandle<()>,
}

impl Deadline {
    /// Cancel `target` once `timeout` has elapsed.
    pub fn cancel_after(target: CancelHandle, timeout: Duration, executor: &IoExecutor) -> Self {
        let timer = executor.spawn(async move {
            tokio::time::sleep(timeout).await;
            if target.cancel() {
                debug!(?timeout, "deadline elapsed, bridge cancelled");
            }
        });
        Self { timer }
    }

    /// Cancel `target` at `deadline`; immediately if it has passed.
    pub fn cancel_at(target: CancelHandle, deadline: Instant, executor: &IoExecutor) -> Self {
        Self::cancel_after(
            target,
            deadline.saturating_duration_since(Instant::now()),
            executor,
        )
    }

    /// Arm a timer for the deadline stored in `context`, if any.
    pub fn from_context(
        target: CancelHandle,
        context: &RequestContext,
        executor: &IoExecutor,
    ) -> Option<Self> {
        context
            .deadline()
            .map(|deadline| Self::cancel_at(target, deadline, executor))
    }

    /// Whether the timer has fired (or was aborted).
    pub fn is_elapsed(&self) -> bool {
        self.timer.is_finished()
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.timer.abort();
    }
}
