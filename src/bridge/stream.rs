use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use futures_util::stream::{self, BoxStream};

use crate::buffer::DemandGatedBuffer;
use crate::source::Source;
use crate::Result;

/// Subscribe to `source` and consume it as an asynchronous [`Stream`].
///
/// Uses the same prefetch-and-replenish buffering as
/// [`to_blocking`](super::to_blocking), but waits by suspending the task.
/// The stream yields items, then at most one error, then ends.
pub fn into_stream<T, S>(source: &S, capacity: usize) -> Result<SourceStream<T>>
where
    T: Send + 'static,
    S: Source<T> + ?Sized,
{
    let buffer = Arc::new(DemandGatedBuffer::labelled(capacity, "stream"));
    source.subscribe(Box::new(buffer.subscriber()))?;

    let inner = stream::unfold(Some(buffer.clone()), |buffer| async move {
        let buffer = buffer?;
        match buffer.recv().await {
            Ok(Some(item)) => Some((Ok(item), Some(buffer))),
            Ok(None) => None,
            Err(err) => Some((Err(err), None)),
        }
    });
    Ok(SourceStream {
        inner: Box::pin(inner),
        buffer,
    })
}

/// A source consumed as a `Stream`. Dropping it cancels the subscription.
pub struct SourceStream<T> {
    inner: BoxStream<'static, Result<T>>,
    buffer: Arc<DemandGatedBuffer<T>>,
}

impl<T> SourceStream<T> {
    /// Cancel the subscription; the stream ends at its next poll.
    pub fn cancel(&self) {
        self.buffer.cancel();
    }
}

impl<T> Stream for SourceStream<T> {
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl<T> Drop for SourceStream<T> {
    fn drop(&mut self) {
        self.buffer.cancel();
    }
}

impl<T> fmt::Debug for SourceStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceStream")
            .field("buffer", &self.buffer)
            .finish()
    }
}
