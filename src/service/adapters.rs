use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::debug;

use super::{
    BlockingPayload, BlockingService, BlockingStreamingService, Payload, Service,
    StreamingService, aggregate,
};
use crate::bridge::{BlockingIterator, BlockingSource, BridgeContext, to_blocking};
use crate::config::DEFAULT_CAPACITY;
use crate::context::RequestContext;
use crate::offload::{ExecutionStrategy, IoExecutor, OperationKind, ensure_may_block};
use crate::source::just;
use crate::{Result, SluiceError};

/// Blocking surfaces may block anywhere, so their bridges offload
/// everything on top of what the caller asked for.
fn blocking_bridge(bridge: &BridgeContext) -> BridgeContext {
    let strategy = bridge
        .policy()
        .strategy()
        .merge(ExecutionStrategy::offload_all());
    bridge.clone().with_strategy(strategy)
}

/// Run `fut` on the I/O executor and block the calling thread for its
/// result. Callers check [`ensure_may_block`] first.
fn block_on<F, R>(executor: &IoExecutor, fut: F) -> Result<R>
where
    F: Future<Output = Result<R>> + Send + 'static,
    R: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    executor.spawn(async move {
        // The caller may have given up waiting.
        let _ = tx.send(fut.await);
    });
    rx.blocking_recv()
        .map_err(|_| SluiceError::ExecutorShutdown)?
}

// ============================================================================
// Streaming → other surfaces
// ============================================================================

/// A [`StreamingService`] seen as a [`BlockingStreamingService`].
pub struct ToBlockingStreaming<S> {
    service: Arc<S>,
    bridge: BridgeContext,
}

pub fn as_blocking_streaming<S>(service: S, bridge: &BridgeContext) -> ToBlockingStreaming<S>
where
    S: StreamingService + 'static,
{
    ToBlockingStreaming {
        service: Arc::new(service),
        bridge: blocking_bridge(bridge),
    }
}

impl<S> BlockingStreamingService for ToBlockingStreaming<S>
where
    S: StreamingService + 'static,
{
    fn handle(
        &self,
        ctx: &RequestContext,
        request: BlockingIterator<Bytes>,
    ) -> Result<BlockingPayload> {
        ensure_may_block(OperationKind::ReceiveRequest)?;
        let request: Payload = Box::new(BlockingSource::new(request, &self.bridge));
        let service = self.service.clone();
        let ctx = ctx.clone();
        let response = block_on(self.bridge.executor(), async move {
            service.handle(&ctx, request).await
        })?;
        let iter = to_blocking(&response, self.bridge.capacity())?;
        Ok(Box::new(iter))
    }

    fn close(&self) -> Result<()> {
        ensure_may_block(OperationKind::ReceiveRequest)?;
        let service = self.service.clone();
        block_on(self.bridge.executor(), async move { service.close().await })
    }
}

/// A [`StreamingService`] seen as an aggregated [`Service`].
pub struct ToService<S> {
    service: S,
    capacity: usize,
}

pub fn as_service<S>(service: S) -> ToService<S>
where
    S: StreamingService,
{
    ToService {
        service,
        capacity: DEFAULT_CAPACITY,
    }
}

impl<S> ToService<S> {
    /// Chunks of the response kept in flight while aggregating.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

#[async_trait]
impl<S> Service for ToService<S>
where
    S: StreamingService,
{
    async fn handle(&self, ctx: &RequestContext, request: Bytes) -> Result<Bytes> {
        let response = self.service.handle(ctx, Box::new(just(request))).await?;
        aggregate(&response, self.capacity).await
    }

    async fn close(&self) -> Result<()> {
        self.service.close().await
    }
}

/// A [`StreamingService`] seen as a [`BlockingService`].
pub struct ToBlocking<S> {
    service: Arc<S>,
    bridge: BridgeContext,
}

pub fn as_blocking<S>(service: S, bridge: &BridgeContext) -> ToBlocking<S>
where
    S: StreamingService + 'static,
{
    ToBlocking {
        service: Arc::new(service),
        bridge: blocking_bridge(bridge),
    }
}

impl<S> BlockingService for ToBlocking<S>
where
    S: StreamingService + 'static,
{
    fn handle(&self, ctx: &RequestContext, request: Bytes) -> Result<Bytes> {
        ensure_may_block(OperationKind::ReceiveRequest)?;
        let service = self.service.clone();
        let ctx = ctx.clone();
        let capacity = self.bridge.capacity();
        block_on(self.bridge.executor(), async move {
            let response = service.handle(&ctx, Box::new(just(request))).await?;
            aggregate(&response, capacity).await
        })
    }

    fn close(&self) -> Result<()> {
        ensure_may_block(OperationKind::ReceiveRequest)?;
        let service = self.service.clone();
        block_on(self.bridge.executor(), async move { service.close().await })
    }
}

// ============================================================================
// Other surfaces → streaming
// ============================================================================

/// A [`BlockingStreamingService`] seen as a [`StreamingService`].
///
/// The handler runs on the blocking pool; its response producer is driven
/// by a [`BlockingSource`] worker.
pub struct FromBlockingStreaming<B> {
    service: Arc<B>,
    bridge: BridgeContext,
}

pub fn from_blocking_streaming<B>(service: B, bridge: &BridgeContext) -> FromBlockingStreaming<B>
where
    B: BlockingStreamingService + 'static,
{
    FromBlockingStreaming {
        service: Arc::new(service),
        bridge: blocking_bridge(bridge),
    }
}

#[async_trait]
impl<B> StreamingService for FromBlockingStreaming<B>
where
    B: BlockingStreamingService + 'static,
{
    async fn handle(&self, ctx: &RequestContext, request: Payload) -> Result<Payload> {
        let request = to_blocking(&request, self.bridge.capacity())?;
        let service = self.service.clone();
        let ctx = ctx.clone();
        let response = self
            .bridge
            .policy()
            .run(OperationKind::ReceiveRequest, move || {
                service.handle(&ctx, request)
            })
            .await??;
        debug!("blocking streaming handler returned");
        Ok(Box::new(BlockingSource::new(response, &self.bridge)))
    }

    async fn close(&self) -> Result<()> {
        let service = self.service.clone();
        self.bridge
            .policy()
            .run(OperationKind::ReceiveRequest, move || service.close())
            .await?
    }
}

/// An aggregated [`Service`] seen as a [`StreamingService`].
pub struct FromService<S> {
    service: S,
    capacity: usize,
}

pub fn from_service<S>(service: S) -> FromService<S>
where
    S: Service,
{
    FromService {
        service,
        capacity: DEFAULT_CAPACITY,
    }
}

impl<S> FromService<S> {
    /// Chunks of the request kept in flight while aggregating.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

#[async_trait]
impl<S> StreamingService for FromService<S>
where
    S: Service,
{
    async fn handle(&self, ctx: &RequestContext, request: Payload) -> Result<Payload> {
        let body = aggregate(&request, self.capacity).await?;
        let response = self.service.handle(ctx, body).await?;
        Ok(Box::new(just(response)))
    }

    async fn close(&self) -> Result<()> {
        self.service.close().await
    }
}

/// A [`BlockingService`] seen as a [`StreamingService`].
pub struct FromBlocking<B> {
    service: Arc<B>,
    bridge: BridgeContext,
}

pub fn from_blocking<B>(service: B, bridge: &BridgeContext) -> FromBlocking<B>
where
    B: BlockingService + 'static,
{
    FromBlocking {
        service: Arc::new(service),
        bridge: blocking_bridge(bridge),
    }
}

#[async_trait]
impl<B> StreamingService for FromBlocking<B>
where
    B: BlockingService + 'static,
{
    async fn handle(&self, ctx: &RequestContext, request: Payload) -> Result<Payload> {
        let body = aggregate(&request, self.bridge.capacity()).await?;
        let service = self.service.clone();
        let ctx = ctx.clone();
        let response = self
            .bridge
            .policy()
            .run(OperationKind::ReceiveRequest, move || service.handle(&ctx, body))
            .await??;
        Ok(Box::new(just(response)))
    }

    async fn close(&self) -> Result<()> {
        let service = self.service.clone();
        self.bridge
            .policy()
            .run(OperationKind::ReceiveRequest, move || service.close())
            .await?
    }
}
