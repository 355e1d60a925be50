use std::iter::{Empty, Once, Peekable};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::trace;

use super::guard::CancelGuard;
use super::{Demand, Source, Subscriber, Subscription, Terminal};
use crate::{Result, SluiceError};

/// A source replaying an in-memory iterator.
///
/// Items are emitted synchronously on whichever thread grants demand.
/// Completion and failure are signalled as soon as they are next in line,
/// without waiting for demand.
pub struct IterSource<I> {
    iter: Mutex<Option<I>>,
}

impl<I> IterSource<I> {
    pub fn new(iter: I) -> Self {
        Self {
            iter: Mutex::new(Some(iter)),
        }
    }
}

/// Source emitting every element of `items`.
pub fn from_iter<T, I>(items: I) -> IterSource<I::IntoIter>
where
    I: IntoIterator<Item = Result<T>>,
{
    IterSource::new(items.into_iter())
}

/// Source emitting one item, then completing.
pub fn just<T>(item: T) -> IterSource<Once<Result<T>>> {
    IterSource::new(std::iter::once(Ok(item)))
}

/// Source completing without items.
pub fn empty<T>() -> IterSource<Empty<Result<T>>> {
    IterSource::new(std::iter::empty())
}

/// Source failing without items.
pub fn failed<T>(err: SluiceError) -> IterSource<Once<Result<T>>> {
    IterSource::new(std::iter::once(Err(err)))
}

impl<T, I> Source<T> for IterSource<I>
where
    T: Send + 'static,
    I: Iterator<Item = Result<T>> + Send + 'static,
{
    fn subscribe(&self, mut subscriber: Box<dyn Subscriber<T>>) -> Result<()> {
        let iter = self
            .iter
            .lock()
            .take()
            .ok_or(SluiceError::DuplicateSubscription)?;
        let emitter = Arc::new(Emitter {
            demand: Demand::new(),
            wip: AtomicUsize::new(0),
            guard: CancelGuard::default(),
            done: AtomicBool::new(false),
            slots: Mutex::new(Slots {
                iter: Some(iter.peekable()),
                subscriber: None,
            }),
        });
        // Demand granted from inside on_subscribe accumulates until the
        // subscriber is parked in its slot.
        subscriber.on_subscribe(emitter.clone());
        emitter.slots.lock().subscriber = Some(subscriber);
        emitter.drain();
        Ok(())
    }
}

struct Slots<T, I: Iterator> {
    iter: Option<Peekable<I>>,
    subscriber: Option<Box<dyn Subscriber<T>>>,
}

/// Serialises emission: whichever thread raises `wip` from zero drains,
/// re-entrant calls only record that another pass is needed.
struct Emitter<T, I: Iterator> {
    demand: Demand,
    wip: AtomicUsize,
    guard: CancelGuard,
    done: AtomicBool,
    slots: Mutex<Slots<T, I>>,
}

impl<T, I> Emitter<T, I>
where
    I: Iterator<Item = Result<T>>,
{
    fn drain(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let mut missed = 1;
        loop {
            self.emit_available();
            let previous = self.wip.fetch_sub(missed, Ordering::AcqRel);
            missed = previous - missed;
            if missed == 0 {
                break;
            }
        }
    }

    fn emit_available(&self) {
        let mut slots = self.slots.lock();
        loop {
            if self.guard.is_cancelled() {
                slots.iter = None;
                slots.subscriber = None;
                return;
            }
            let Slots { iter, subscriber } = &mut *slots;
            let (Some(items), Some(sink)) = (iter.as_mut(), subscriber.as_mut()) else {
                return;
            };
            let terminal = match items.peek() {
                None => Terminal::Completed,
                Some(Err(_)) => match items.next() {
                    Some(Err(err)) => Terminal::Failed(err),
                    _ => Terminal::Completed,
                },
                Some(Ok(_)) => {
                    if !self.demand.try_take() {
                        return;
                    }
                    if let Some(Ok(item)) = items.next() {
                        self.guard.deliver(|| sink.on_next(item));
                    }
                    continue;
                }
            };
            self.done.store(true, Ordering::Release);
            slots.iter = None;
            if let Some(mut sink) = slots.subscriber.take() {
                trace!(completed = terminal.is_completed(), "iterator source terminated");
                self.guard.deliver(|| sink.on_terminal(terminal));
            }
            return;
        }
    }
}

impl<T, I> Subscription for Emitter<T, I>
where
    T: Send,
    I: Iterator<Item = Result<T>> + Send,
{
    fn request(&self, n: u64) -> Result<()> {
        if n == 0 {
            return Err(SluiceError::InvalidDemand);
        }
        if self.guard.is_cancelled() || self.done.load(Ordering::Acquire) {
            return Err(SluiceError::RequestAfterTermination);
        }
        self.demand.add(n);
        self.drain();
        Ok(())
    }

    fn cancel(&self) {
        if self.guard.cancel() {
            trace!("iterator source cancelled");
            self.drain();
        }
    }
}
