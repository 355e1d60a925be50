//! Service surfaces over one payload stream.
//!
//! A handler can be written against any of four traits:
//!
//! | Trait | Payload | Calling thread |
//! |---|---|---|
//! | [`StreamingService`] | [`Payload`] source | I/O |
//! | [`Service`] | whole body ([`Bytes`]) | I/O |
//! | [`BlockingStreamingService`] | blocking iterator / producer | blocking pool |
//! | [`BlockingService`] | whole body ([`Bytes`]) | blocking pool |
//!
//! [`StreamingService`] is canonical. The adapters in this module convert
//! every other surface into it and back; they only compose the bridges and
//! add no concurrency of their own.

mod adapters;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::TryStreamExt;
use std::sync::Arc;

use crate::Result;
use crate::bridge::{BlockingIterator, BlockingProducer, into_stream};
use crate::context::RequestContext;
use crate::offload::{OperationKind, ensure_may_block};
use crate::source::Source;

pub use adapters::{
    FromBlocking, FromBlockingStreaming, FromService, ToBlocking, ToBlockingStreaming, ToService,
    as_blocking, as_blocking_streaming, as_service, from_blocking, from_blocking_streaming,
    from_service,
};

/// Streaming payload of the asynchronous surfaces.
pub type Payload = Box<dyn Source<Bytes>>;

/// Streaming payload produced by blocking handlers.
pub type BlockingPayload = Box<dyn BlockingProducer<Bytes>>;

/// Asynchronous streaming handler. Every other surface converts to this one.
#[async_trait]
pub trait StreamingService: Send + Sync {
    async fn handle(&self, ctx: &RequestContext, request: Payload) -> Result<Payload>;

    /// Release the resources of the service.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<S> StreamingService for Arc<S>
where
    S: StreamingService + ?Sized,
{
    async fn handle(&self, ctx: &RequestContext, request: Payload) -> Result<Payload> {
        (**self).handle(ctx, request).await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}

/// Asynchronous handler of whole bodies.
#[async_trait]
pub trait Service: Send + Sync {
    async fn handle(&self, ctx: &RequestContext, request: Bytes) -> Result<Bytes>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Blocking handler iterating the request and producing the response
/// through a blocking producer.
pub trait BlockingStreamingService: Send + Sync {
    fn handle(
        &self,
        ctx: &RequestContext,
        request: BlockingIterator<Bytes>,
    ) -> Result<BlockingPayload>;

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Blocking handler of whole bodies.
pub trait BlockingService: Send + Sync {
    fn handle(&self, ctx: &RequestContext, request: Bytes) -> Result<Bytes>;

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Consume `payload` to completion and concatenate its chunks, keeping at
/// most `capacity` chunks in flight.
pub async fn aggregate<S>(payload: &S, capacity: usize) -> Result<Bytes>
where
    S: Source<Bytes> + ?Sized,
{
    into_stream(payload, capacity)?
        .try_fold(BytesMut::new(), |mut body, chunk| async move {
            body.extend_from_slice(&chunk);
            Ok(body)
        })
        .await
        .map(BytesMut::freeze)
}

/// Blocking form of [`aggregate`] over a blocking producer.
///
/// The producer is closed afterwards, also when pulling fails.
pub fn aggregate_blocking<P>(payload: &mut P) -> Result<Bytes>
where
    P: BlockingProducer<Bytes> + ?Sized,
{
    ensure_may_block(OperationKind::ConsumePayload)?;
    let mut body = BytesMut::new();
    let drained = loop {
        match payload.pull() {
            Ok(Some(chunk)) => body.extend_from_slice(&chunk),
            Ok(None) => break Ok(()),
            Err(err) => break Err(err),
        }
    };
    let closed = payload.close();
    drained?;
    closed?;
    Ok(body.freeze())
}
