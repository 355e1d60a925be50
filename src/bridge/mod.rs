//! Bridges between the asynchronous source model and blocking iteration.
//!
//! - [`to_blocking`] turns a [`Source`](crate::source::Source) into a
//!   [`BlockingIterator`] pulled by a blocking consumer thread.
//! - [`BlockingSource`] turns a [`BlockingProducer`] into a source whose
//!   producer is driven by a worker on the blocking pool.
//! - [`into_stream`] consumes a source as a `futures` [`Stream`](futures_util::Stream).
//!
//! Each bridge owns one [`DemandGatedBuffer`](crate::buffer::DemandGatedBuffer)
//! for its whole lifetime.

mod from_blocking;
mod stream;
mod to_blocking;

use crate::config::{Config, DEFAULT_CAPACITY};
use crate::offload::{ExecutionStrategy, IoExecutor, OffloadPolicy};
use crate::{Result, SluiceError};

pub use from_blocking::BlockingSource;
pub use stream::{SourceStream, into_stream};
pub use to_blocking::{BlockingIterator, to_blocking};

/// A pull-based producer supplied by blocking user code.
pub trait BlockingProducer<T>: Send {
    /// Produce the next item, blocking as long as needed. `Ok(None)` means
    /// the producer is exhausted.
    fn pull(&mut self) -> Result<Option<T>>;

    /// Release the resources behind the producer.
    ///
    /// Called exactly once by [`BlockingSource`], whether the producer was
    /// exhausted, failed or was cancelled.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T, P> BlockingProducer<T> for Box<P>
where
    P: BlockingProducer<T> + ?Sized,
{
    fn pull(&mut self) -> Result<Option<T>> {
        (**self).pull()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Blocking producer over a plain iterator of results.
#[derive(Debug)]
pub struct IterProducer<I>(pub I);

impl<T, I> BlockingProducer<T> for IterProducer<I>
where
    I: Iterator<Item = Result<T>> + Send,
{
    fn pull(&mut self) -> Result<Option<T>> {
        self.0.next().transpose()
    }
}

/// Everything a bridge needs besides its endpoints: where work runs and how
/// much may be buffered.
#[derive(Debug, Clone)]
pub struct BridgeContext {
    policy: OffloadPolicy,
    capacity: usize,
}

impl BridgeContext {
    pub fn new(policy: OffloadPolicy, capacity: usize) -> Self {
        Self {
            policy,
            capacity: capacity.max(1),
        }
    }

    /// Build a dedicated executor and policy from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let executor = IoExecutor::new(&config.executor)?;
        let policy = OffloadPolicy::new(config.strategy.strategy(), executor);
        Ok(Self::new(policy, config.buffer.capacity))
    }

    /// Context on the current tokio runtime, offloading everything.
    ///
    /// Fails with [`SluiceError::Configuration`] outside a runtime.
    pub fn current() -> Result<Self> {
        let handle = tokio::runtime::Handle::try_current().map_err(|e| {
            SluiceError::Configuration(format!("no tokio runtime available: {e}"))
        })?;
        let policy = OffloadPolicy::new(
            ExecutionStrategy::offload_all(),
            IoExecutor::from_handle(handle),
        );
        Ok(Self::new(policy, DEFAULT_CAPACITY))
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn with_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.policy = OffloadPolicy::new(strategy, self.policy.executor().clone());
        self
    }

    pub fn policy(&self) -> &OffloadPolicy {
        &self.policy
    }

    pub fn executor(&self) -> &IoExecutor {
        self.policy.executor()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
