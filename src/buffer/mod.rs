//! Bounded handoff between a producer context and a consumer context.
//!
//! The [`DemandGatedBuffer`] sits between one upstream [`Subscription`] and
//! one consumer. It keeps `buffered + outstanding demand == capacity`: the
//! initial request prefetches `capacity` items and every item handed to the
//! consumer is replaced by a `request(1)` upstream. Consumers pull either by
//! blocking the calling thread ([`poll_blocking`](DemandGatedBuffer::poll_blocking))
//! or by suspending a task ([`recv`](DemandGatedBuffer::recv)).
//!
//! A terminal signal is held back until every buffered item has been
//! consumed. Cancellation wins over that: buffered items are dropped
//! immediately and no terminal signal is reported.

mod state;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

use crate::source::{Subscriber, Subscription, Terminal};
use crate::telemetry;
use crate::{Result, SluiceError};

pub use state::{BridgeState, Outcome};
use state::StateCell;

/// An item the buffer refused.
#[derive(Debug, PartialEq, Eq)]
pub enum Rejected<T> {
    /// The buffer was cancelled or has already received a terminal signal.
    Closed(T),
    /// No outstanding demand, or the buffer is full.
    NoDemand(T),
}

impl<T> Rejected<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Closed(item) | Self::NoDemand(item) => item,
        }
    }
}

struct Inner<T> {
    queue: VecDeque<T>,
    outstanding: u64,
    terminal: Option<Terminal>,
    upstream: Option<Arc<dyn Subscription>>,
}

/// What the consumer side may do next.
enum Readiness {
    Item,
    Terminal(Terminal),
    /// Terminal already observed, or cancelled.
    Exhausted,
}

/// Bounded, demand-gated single-producer/single-consumer handoff.
pub struct DemandGatedBuffer<T> {
    capacity: usize,
    label: &'static str,
    inner: Mutex<Inner<T>>,
    readable: Condvar,
    notify: Notify,
    state: StateCell,
}

impl<T> DemandGatedBuffer<T> {
    /// Create a buffer holding at most `capacity` items (at least one).
    pub fn new(capacity: usize) -> Self {
        Self::labelled(capacity, "buffer")
    }

    /// Like [`new`](Self::new), with the `bridge` label used in logs and
    /// metrics.
    pub(crate) fn labelled(capacity: usize, label: &'static str) -> Self {
        Self {
            capacity: capacity.max(1),
            label,
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity.max(1)),
                outstanding: 0,
                terminal: None,
                upstream: None,
            }),
            readable: Condvar::new(),
            notify: Notify::new(),
            state: StateCell::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of buffered items.
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Demand requested upstream and not yet fulfilled.
    pub fn outstanding(&self) -> u64 {
        self.inner.lock().outstanding
    }

    pub fn state(&self) -> BridgeState {
        self.state.load()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load() == BridgeState::Terminated(Outcome::Cancelled)
    }

    /// Connect the upstream subscription and prefetch `capacity` items.
    ///
    /// A second subscription is cancelled on arrival. If the buffer was
    /// cancelled before the upstream arrived, the upstream is cancelled
    /// right away.
    pub fn attach(&self, upstream: Arc<dyn Subscription>) {
        let prefetch = {
            let mut inner = self.inner.lock();
            if self.state.load().is_terminated() {
                None
            } else if inner.upstream.is_some() {
                warn!(bridge = self.label, "second upstream subscription refused");
                None
            } else {
                inner.upstream = Some(upstream.clone());
                inner.outstanding = self.capacity as u64;
                self.state.subscribe();
                Some(self.capacity as u64)
            }
        };
        let Some(prefetch) = prefetch else {
            upstream.cancel();
            return;
        };
        trace!(bridge = self.label, prefetch, "buffer subscribed");
        if let Err(err) = upstream.request(prefetch) {
            self.abort(err);
        }
    }

    /// Hand one item to the buffer.
    pub fn offer(&self, item: T) -> std::result::Result<(), Rejected<T>> {
        {
            let mut inner = self.inner.lock();
            if self.state.load().is_terminated() || inner.terminal.is_some() {
                return Err(Rejected::Closed(item));
            }
            if inner.outstanding == 0 || inner.queue.len() >= self.capacity {
                return Err(Rejected::NoDemand(item));
            }
            inner.outstanding -= 1;
            inner.queue.push_back(item);
        }
        self.wake();
        Ok(())
    }

    /// Store the terminal signal; it is reported once the buffer drains.
    ///
    /// Returns `false` when a terminal signal was already stored or the
    /// buffer has been cancelled; the signal is dropped in that case.
    pub fn signal_terminal(&self, terminal: Terminal) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.terminal.is_some() || self.state.load().is_terminated() {
                trace!(bridge = self.label, "late terminal signal dropped");
                return false;
            }
            inner.terminal = Some(terminal);
            self.state.drain();
        }
        self.wake();
        true
    }

    /// Report `err` after the buffered items and cancel the upstream.
    pub fn abort(&self, err: SluiceError) {
        if err.is_protocol_violation() {
            metrics::counter!(telemetry::PROTOCOL_VIOLATIONS_TOTAL, "bridge" => self.label)
                .increment(1);
        }
        warn!(bridge = self.label, error = %err, "aborting bridge");
        let upstream = self.inner.lock().upstream.clone();
        self.signal_terminal(Terminal::Failed(err));
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
    }

    /// Cancel the bridge: drop buffered items, forget any pending terminal
    /// signal and cancel the upstream.
    ///
    /// Returns `true` if this call moved the bridge into
    /// `Terminated(Cancelled)`. Idempotent.
    pub fn cancel(&self) -> bool {
        let (discarded, upstream) = {
            let mut inner = self.inner.lock();
            if !self.state.terminate(Outcome::Cancelled) {
                return false;
            }
            inner.terminal = None;
            inner.outstanding = 0;
            (std::mem::take(&mut inner.queue), inner.upstream.clone())
        };
        debug!(
            bridge = self.label,
            discarded = discarded.len(),
            "bridge cancelled"
        );
        // Released here, before returning to the canceller.
        drop(discarded);
        metrics::counter!(telemetry::CANCELLATIONS_TOTAL, "bridge" => self.label).increment(1);
        metrics::counter!(telemetry::TERMINALS_TOTAL,
            "bridge" => self.label,
            "outcome" => Outcome::Cancelled.as_str(),
        )
        .increment(1);
        self.wake();
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
        true
    }

    /// Block until an item, a terminal signal or cancellation is available.
    ///
    /// `Ok(true)`: an item can be taken. `Ok(false)`: exhausted (completed,
    /// cancelled, or the terminal signal was already reported). `Err`: the
    /// upstream failure, reported exactly once. A timeout too large to
    /// express as an instant waits without one.
    pub fn wait_blocking(&self, timeout: Option<Duration>) -> Result<bool> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut inner = self.inner.lock();
        loop {
            match self.readiness(&mut inner) {
                Some(Readiness::Item) => return Ok(true),
                Some(Readiness::Exhausted) => return Ok(false),
                Some(Readiness::Terminal(terminal)) => {
                    return terminal.into_result().map(|()| false);
                }
                None => {}
            }
            match (deadline, timeout) {
                (Some(deadline), Some(timeout)) => {
                    if self.readable.wait_until(&mut inner, deadline).timed_out()
                        && self.readiness_pending(&inner)
                    {
                        return Err(SluiceError::TimedOut(timeout));
                    }
                }
                _ => self.readable.wait(&mut inner),
            }
        }
    }

    /// Pop the next buffered item and replenish upstream demand.
    pub fn take(&self) -> Option<T> {
        let (item, replenish) = {
            let mut inner = self.inner.lock();
            let item = inner.queue.pop_front()?;
            let replenish = if inner.terminal.is_none() && !self.state.load().is_terminated() {
                inner.outstanding += 1;
                inner.upstream.clone()
            } else {
                None
            };
            (item, replenish)
        };
        metrics::counter!(telemetry::ITEMS_DELIVERED_TOTAL, "bridge" => self.label).increment(1);
        if let Some(upstream) = replenish {
            // The upstream may have terminated in the meantime.
            if let Err(err) = upstream.request(1) {
                trace!(bridge = self.label, error = %err, "replenish refused");
            }
        }
        Some(item)
    }

    /// Blocking pull: the next item, `None` once exhausted, or the upstream
    /// failure.
    pub fn poll_blocking(&self, timeout: Option<Duration>) -> Result<Option<T>> {
        loop {
            if !self.wait_blocking(timeout)? {
                return Ok(None);
            }
            if let Some(item) = self.take() {
                return Ok(Some(item));
            }
        }
    }

    /// Suspending pull with the same results as
    /// [`poll_blocking`](Self::poll_blocking).
    pub async fn recv(&self) -> Result<Option<T>> {
        loop {
            let notified = self.notify.notified();
            let ready = {
                let mut inner = self.inner.lock();
                self.readiness(&mut inner)
            };
            match ready {
                Some(Readiness::Item) => {
                    if let Some(item) = self.take() {
                        return Ok(Some(item));
                    }
                }
                Some(Readiness::Exhausted) => return Ok(None),
                Some(Readiness::Terminal(terminal)) => {
                    return terminal.into_result().map(|()| None);
                }
                None => notified.await,
            }
        }
    }

    fn readiness(&self, inner: &mut Inner<T>) -> Option<Readiness> {
        if self.is_cancelled() {
            return Some(Readiness::Exhausted);
        }
        if !inner.queue.is_empty() {
            return Some(Readiness::Item);
        }
        if let Some(terminal) = inner.terminal.take() {
            let outcome = if terminal.is_completed() {
                Outcome::Completed
            } else {
                Outcome::Failed
            };
            self.state.terminate(outcome);
            inner.upstream = None;
            debug!(bridge = self.label, outcome = outcome.as_str(), "bridge terminated");
            metrics::counter!(telemetry::TERMINALS_TOTAL,
                "bridge" => self.label,
                "outcome" => outcome.as_str(),
            )
            .increment(1);
            return Some(Readiness::Terminal(terminal));
        }
        if self.state.load().is_terminated() {
            return Some(Readiness::Exhausted);
        }
        None
    }

    fn readiness_pending(&self, inner: &Inner<T>) -> bool {
        inner.queue.is_empty() && inner.terminal.is_none() && !self.state.load().is_terminated()
    }

    fn wake(&self) {
        self.readable.notify_all();
        self.notify.notify_one();
    }
}

impl<T> fmt::Debug for DemandGatedBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DemandGatedBuffer")
            .field("bridge", &self.label)
            .field("capacity", &self.capacity)
            .field("state", &self.state.load())
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> DemandGatedBuffer<T> {
    /// Subscriber feeding this buffer, for handing to a source.
    pub fn subscriber(self: &Arc<Self>) -> BufferSubscriber<T> {
        BufferSubscriber {
            buffer: self.clone(),
        }
    }

    /// Type-erased handle cancelling this buffer.
    pub fn cancel_handle(self: &Arc<Self>) -> CancelHandle {
        CancelHandle {
            target: self.clone(),
        }
    }
}

/// Upstream-facing half of a [`DemandGatedBuffer`].
pub struct BufferSubscriber<T> {
    buffer: Arc<DemandGatedBuffer<T>>,
}

impl<T: Send + 'static> Subscriber<T> for BufferSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        self.buffer.attach(subscription);
    }

    fn on_next(&mut self, item: T) {
        match self.buffer.offer(item) {
            Ok(()) => {}
            Err(Rejected::Closed(_)) => {
                trace!(bridge = self.buffer.label, "item after close discarded");
            }
            Err(Rejected::NoDemand(_)) => {
                self.buffer.abort(SluiceError::DemandExceeded {
                    capacity: self.buffer.capacity,
                });
            }
        }
    }

    fn on_terminal(&mut self, terminal: Terminal) {
        self.buffer.signal_terminal(terminal);
    }
}

trait Cancellable: Send + Sync {
    fn cancel(&self) -> bool;
}

impl<T: Send> Cancellable for DemandGatedBuffer<T> {
    fn cancel(&self) -> bool {
        DemandGatedBuffer::cancel(self)
    }
}

/// Cancels a bridge from any thread, exactly like the consumer closing it.
///
/// Used by deadline timers and other external collaborators.
#[derive(Clone)]
pub struct CancelHandle {
    target: Arc<dyn Cancellable>,
}

impl CancelHandle {
    /// Returns `true` if this call terminated the bridge.
    pub fn cancel(&self) -> bool {
        self.target.cancel()
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle").finish_non_exhaustive()
    }
}
