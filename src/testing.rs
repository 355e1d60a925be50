//! Hand-driven sources and recording subscribers for tests.
//!
//! [`TestSource`] lets a test push signals to its subscriber one by one and
//! observe the demand and cancellation it receives through a
//! [`TestSubscription`]. [`RecordingSubscriber`] records everything a
//! source delivers and lets the test wait for it from another thread.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::source::{Source, Subscriber, Subscription, Terminal};
use crate::{Result, SluiceError};

// ============================================================================
// TestSource
// ============================================================================

/// A source whose signals are issued by the test.
///
/// Signals are forwarded as-is, without checking demand, so tests can also
/// provoke protocol violations.
pub struct TestSource<T> {
    subscriber: Mutex<Option<Box<dyn Subscriber<T>>>>,
    subscribed: AtomicBool,
}

impl<T> Default for TestSource<T> {
    fn default() -> Self {
        Self {
            subscriber: Mutex::new(None),
            subscribed: AtomicBool::new(false),
        }
    }
}

impl<T> TestSource<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
    }

    /// Hand `subscription` to the subscriber. Returns `false` without a
    /// subscriber.
    pub fn on_subscribe(&self, subscription: Arc<dyn Subscription>) -> bool {
        self.with_subscriber(|s| s.on_subscribe(subscription))
    }

    pub fn on_next(&self, item: T) -> bool {
        self.with_subscriber(|s| s.on_next(item))
    }

    pub fn on_complete(&self) -> bool {
        self.with_subscriber(|s| s.on_terminal(Terminal::Completed))
    }

    pub fn on_error(&self, err: SluiceError) -> bool {
        self.with_subscriber(|s| s.on_terminal(Terminal::Failed(err)))
    }

    fn with_subscriber(&self, signal: impl FnOnce(&mut dyn Subscriber<T>)) -> bool {
        match self.subscriber.lock().as_mut() {
            Some(subscriber) => {
                signal(subscriber.as_mut());
                true
            }
            None => false,
        }
    }
}

impl<T: Send + 'static> Source<T> for TestSource<T> {
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) -> Result<()> {
        if self.subscribed.swap(true, Ordering::AcqRel) {
            return Err(SluiceError::DuplicateSubscription);
        }
        *self.subscriber.lock() = Some(subscriber);
        Ok(())
    }
}

impl<T> fmt::Debug for TestSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestSource")
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}

/// Subscription recording the demand and cancellation it receives.
#[derive(Debug, Default)]
pub struct TestSubscription {
    requested: AtomicU64,
    requests: AtomicUsize,
    cancelled: AtomicBool,
}

impl TestSubscription {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Total demand requested so far (saturating).
    pub fn requested(&self) -> u64 {
        self.requested.load(Ordering::Acquire)
    }

    /// Number of `request` calls.
    pub fn request_calls(&self) -> usize {
        self.requests.load(Ordering::Acquire)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Subscription for TestSubscription {
    fn request(&self, n: u64) -> Result<()> {
        if n == 0 {
            return Err(SluiceError::InvalidDemand);
        }
        self.requests.fetch_add(1, Ordering::AcqRel);
        let _ = self
            .requested
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| {
                Some(r.saturating_add(n))
            });
        Ok(())
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

// ============================================================================
// RecordingSubscriber
// ============================================================================

struct Log<T> {
    items: Vec<T>,
    completions: usize,
    errors: Vec<SluiceError>,
    /// Signals received after a terminal signal.
    late: usize,
    subscription: Option<Arc<dyn Subscription>>,
    pending_demand: u64,
    pending_cancel: bool,
}

impl<T> Log<T> {
    fn terminals(&self) -> usize {
        self.completions + self.errors.len()
    }
}

/// What a [`RecordingSubscriber`] has seen, shared with the test.
pub struct Recording<T> {
    log: Mutex<Log<T>>,
    changed: Condvar,
}

impl<T> Recording<T> {
    /// Request `n` more items. Demand requested before the subscription
    /// arrives is forwarded once it does.
    pub fn request(&self, n: u64) -> Result<()> {
        let subscription = {
            let mut log = self.log.lock();
            match &log.subscription {
                Some(subscription) => subscription.clone(),
                None => {
                    log.pending_demand = log.pending_demand.saturating_add(n);
                    return Ok(());
                }
            }
        };
        subscription.request(n)
    }

    pub fn cancel(&self) {
        let subscription = {
            let mut log = self.log.lock();
            log.pending_cancel = true;
            log.subscription.clone()
        };
        if let Some(subscription) = subscription {
            subscription.cancel();
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.log.lock().subscription.is_some()
    }

    pub fn item_count(&self) -> usize {
        self.log.lock().items.len()
    }

    pub fn is_completed(&self) -> bool {
        self.log.lock().completions > 0
    }

    /// Number of terminal signals received; never more than one for a
    /// well-behaved source.
    pub fn terminal_count(&self) -> usize {
        self.log.lock().terminals()
    }

    /// Signals received after the first terminal signal.
    pub fn late_signals(&self) -> usize {
        self.log.lock().late
    }

    /// Take the recorded failure, if any.
    pub fn take_error(&self) -> Option<SluiceError> {
        let mut log = self.log.lock();
        if log.errors.is_empty() {
            None
        } else {
            Some(log.errors.remove(0))
        }
    }

    pub fn error_message(&self) -> Option<String> {
        self.log.lock().errors.first().map(ToString::to_string)
    }

    /// Wait until at least `n` items arrived. `false` on timeout.
    pub fn wait_for_items(&self, n: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |log| log.items.len() >= n)
    }

    /// Wait for the terminal signal. `false` on timeout.
    pub fn wait_for_terminal(&self, timeout: Duration) -> bool {
        self.wait_until(timeout, |log| log.terminals() > 0)
    }

    fn wait_until(&self, timeout: Duration, done: impl Fn(&Log<T>) -> bool) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut log = self.log.lock();
        while !done(&log) {
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut log, deadline).timed_out() {
                        return done(&log);
                    }
                }
                None => self.changed.wait(&mut log),
            }
        }
        true
    }
}

impl<T: Clone> Recording<T> {
    pub fn items(&self) -> Vec<T> {
        self.log.lock().items.clone()
    }
}

impl<T> fmt::Debug for Recording<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let log = self.log.lock();
        f.debug_struct("Recording")
            .field("items", &log.items.len())
            .field("completions", &log.completions)
            .field("errors", &log.errors.len())
            .finish_non_exhaustive()
    }
}

/// Subscriber recording every signal into a shared [`Recording`].
pub struct RecordingSubscriber<T> {
    recording: Arc<Recording<T>>,
}

impl<T> RecordingSubscriber<T> {
    /// Subscriber that requests nothing on its own.
    pub fn new() -> Self {
        Self::requesting(0)
    }

    /// Subscriber requesting `n` items as soon as it is subscribed.
    pub fn requesting(n: u64) -> Self {
        Self {
            recording: Arc::new(Recording {
                log: Mutex::new(Log {
                    items: Vec::new(),
                    completions: 0,
                    errors: Vec::new(),
                    late: 0,
                    subscription: None,
                    pending_demand: n,
                    pending_cancel: false,
                }),
                changed: Condvar::new(),
            }),
        }
    }

    pub fn recording(&self) -> Arc<Recording<T>> {
        self.recording.clone()
    }
}

impl<T> Default for RecordingSubscriber<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Subscriber<T> for RecordingSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        let (demand, cancel) = {
            let mut log = self.recording.log.lock();
            log.subscription = Some(subscription.clone());
            (std::mem::take(&mut log.pending_demand), log.pending_cancel)
        };
        self.recording.changed.notify_all();
        if cancel {
            subscription.cancel();
        } else if demand > 0 {
            // A refusal here surfaces as the source's terminal signal.
            let _ = subscription.request(demand);
        }
    }

    fn on_next(&mut self, item: T) {
        let mut log = self.recording.log.lock();
        if log.terminals() > 0 {
            log.late += 1;
        } else {
            log.items.push(item);
        }
        drop(log);
        self.recording.changed.notify_all();
    }

    fn on_terminal(&mut self, terminal: Terminal) {
        let mut log = self.recording.log.lock();
        if log.terminals() > 0 {
            log.late += 1;
        }
        match terminal {
            Terminal::Completed => log.completions += 1,
            Terminal::Failed(err) => log.errors.push(err),
        }
        drop(log);
        self.recording.changed.notify_all();
    }
}
