//! Push-based, demand-gated item sources.
//!
//! A [`Source`] accepts exactly one [`Subscriber`], hands it a
//! [`Subscription`] and then emits items only while the subscriber has
//! outstanding demand. Every subscription ends with at most one
//! [`Terminal`] signal, and nothing is delivered after it or after
//! cancellation.

mod demand;
mod guard;
mod iter;
mod stream;

use std::sync::Arc;

use crate::{Result, SluiceError};

pub use demand::Demand;
pub(crate) use guard::CancelGuard;
pub use iter::{IterSource, empty, failed, from_iter, just};
pub use stream::StreamSource;

/// The single completion-or-failure event ending a stream.
#[derive(Debug)]
pub enum Terminal {
    Completed,
    Failed(SluiceError),
}

impl Terminal {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// `Ok(())` for completion, the carried error otherwise.
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Completed => Ok(()),
            Self::Failed(err) => Err(err),
        }
    }
}

/// Handle held by a subscriber to request demand and to cancel.
pub trait Subscription: Send + Sync {
    /// Add `n` to the outstanding demand.
    ///
    /// Fails with [`SluiceError::InvalidDemand`] for `n == 0` and with
    /// [`SluiceError::RequestAfterTermination`] once the subscription has
    /// been cancelled or has terminated. Demand saturates at `u64::MAX`,
    /// which is treated as unbounded.
    fn request(&self, n: u64) -> Result<()>;

    /// Stop the flow of items. Idempotent.
    ///
    /// Once `cancel` returns, the subscriber receives no further signal. A
    /// signal already being delivered on another thread completes first.
    fn cancel(&self);
}

/// Receiver of the signals of one subscription.
///
/// Signals are delivered serially: `on_subscribe` first, then any number of
/// `on_next`, then at most one `on_terminal`.
pub trait Subscriber<T>: Send {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>);

    fn on_next(&mut self, item: T);

    fn on_terminal(&mut self, terminal: Terminal);
}

/// A producer of an ordered sequence of items.
pub trait Source<T>: Send + Sync {
    /// Attach the one and only subscriber of this source.
    ///
    /// A second call fails with [`SluiceError::DuplicateSubscription`].
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) -> Result<()>;
}

impl<T, S> Source<T> for Arc<S>
where
    S: Source<T> + ?Sized,
{
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) -> Result<()> {
        (**self).subscribe(subscriber)
    }
}

impl<T, S> Source<T> for Box<S>
where
    S: Source<T> + ?Sized,
{
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) -> Result<()> {
        (**self).subscribe(subscriber)
    }
}
