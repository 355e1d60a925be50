use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use super::BlockingProducer;
use crate::buffer::{BridgeState, CancelHandle, DemandGatedBuffer};
use crate::offload::{OperationKind, ensure_may_block};
use crate::source::Source;
use crate::Result;

/// Subscribe to `source` and expose it as a blocking iterator.
///
/// The subscription prefetches `capacity` items and replenishes one for
/// every item taken, so at most `capacity` items are ever buffered.
pub fn to_blocking<T, S>(source: &S, capacity: usize) -> Result<BlockingIterator<T>>
where
    T: Send + 'static,
    S: Source<T> + ?Sized,
{
    let buffer = Arc::new(DemandGatedBuffer::labelled(capacity, "to_blocking"));
    source.subscribe(Box::new(buffer.subscriber()))?;
    Ok(BlockingIterator {
        buffer,
        closed: false,
        fused: false,
    })
}

/// Blocking view of an asynchronous source.
///
/// Pull calls block the calling thread and refuse to run on an I/O thread.
/// Dropping the iterator closes it.
#[derive(Debug)]
pub struct BlockingIterator<T> {
    buffer: Arc<DemandGatedBuffer<T>>,
    closed: bool,
    fused: bool,
}

impl<T: Send + 'static> BlockingIterator<T> {
    /// Block until an item is available (`true`) or the source is exhausted
    /// (`false`). A source failure is returned once, then the iterator
    /// reports exhaustion.
    pub fn has_next(&mut self) -> Result<bool> {
        self.wait_within(None)
    }

    /// Like [`has_next`](Self::has_next), failing with
    /// [`TimedOut`](crate::SluiceError::TimedOut) if nothing arrives in
    /// time. The bridge stays usable after a timeout.
    pub fn has_next_timeout(&mut self, timeout: Duration) -> Result<bool> {
        self.wait_within(Some(timeout))
    }

    /// Block until the next item is available and return it; `None` once
    /// exhausted or closed.
    pub fn next_item(&mut self) -> Result<Option<T>> {
        self.pull_within(None)
    }

    /// Like [`next_item`](Self::next_item) with a timeout.
    pub fn next_timeout(&mut self, timeout: Duration) -> Result<Option<T>> {
        self.pull_within(Some(timeout))
    }

    /// Cancel the upstream subscription and drop buffered items.
    ///
    /// Safe to call repeatedly and at any point of the iteration.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if self.buffer.cancel() {
            trace!("blocking iterator closed before exhaustion");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Lifecycle of the underlying bridge.
    pub fn state(&self) -> BridgeState {
        self.buffer.state()
    }

    /// Number of items received but not yet taken.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Handle cancelling this iterator from another thread, e.g. on a
    /// deadline.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.buffer.cancel_handle()
    }

    fn wait_within(&mut self, timeout: Option<Duration>) -> Result<bool> {
        ensure_may_block(OperationKind::ConsumePayload)?;
        if self.closed {
            return Ok(false);
        }
        self.buffer.wait_blocking(timeout)
    }

    fn pull_within(&mut self, timeout: Option<Duration>) -> Result<Option<T>> {
        ensure_may_block(OperationKind::ConsumePayload)?;
        if self.closed {
            return Ok(None);
        }
        self.buffer.poll_blocking(timeout)
    }
}

impl<T: Send + 'static> Iterator for BlockingIterator<T> {
    type Item = Result<T>;

    /// Yields items, then a failure at most once. After an error the
    /// iterator is closed and yields nothing more.
    fn next(&mut self) -> Option<Self::Item> {
        if self.fused {
            return None;
        }
        match self.next_item() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.fused = true;
                None
            }
            Err(err) => {
                self.fused = true;
                self.close();
                Some(Err(err))
            }
        }
    }
}

impl<T: Send + 'static> BlockingProducer<T> for BlockingIterator<T> {
    fn pull(&mut self) -> Result<Option<T>> {
        self.next_item()
    }

    fn close(&mut self) -> Result<()> {
        BlockingIterator::close(self);
        Ok(())
    }
}

impl<T> Drop for BlockingIterator<T> {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            self.buffer.cancel();
        }
    }
}
