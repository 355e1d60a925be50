use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::ReentrantMutex;

/// Orders signal delivery against cancellation.
///
/// Signals are delivered while holding the guard and [`cancel`](Self::cancel)
/// takes it as well, so once `cancel` returns no signal is in flight and
/// none follows. The lock is re-entrant: a subscriber may cancel from inside
/// its own callback. No other lock may be acquired while waiting in
/// `cancel`.
#[derive(Default)]
pub(crate) struct CancelGuard {
    delivering: ReentrantMutex<()>,
    cancelled: AtomicBool,
}

impl CancelGuard {
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Returns `true` if this call cancelled. Waits for a signal being
    /// delivered on another thread.
    pub(crate) fn cancel(&self) -> bool {
        let _delivering = self.delivering.lock();
        !self.cancelled.swap(true, Ordering::AcqRel)
    }

    /// Run `signal` unless cancelled. Returns whether it ran.
    pub(crate) fn deliver(&self, signal: impl FnOnce()) -> bool {
        let _delivering = self.delivering.lock();
        if self.is_cancelled() {
            return false;
        }
        signal();
        true
    }
}
