//! Sluice - bridges between demand-gated async streams and blocking iteration
//!
//! This crate connects two programming models over the same payload stream:
//! a push-based, demand-gated asynchronous [`Source`] and a pull-based,
//! thread-blocking iterator. Blocking work is always kept off the I/O
//! threads that drive asynchronous delivery.
//!
//! # Async to blocking
//!
//! ```rust,no_run
//! use sluice::{BlockingSource, BridgeContext, Config, to_blocking};
//!
//! fn main() -> sluice::Result<()> {
//!     let bridge = BridgeContext::from_config(&Config::default())?;
//!
//!     // A blocking producer, pulled on the blocking pool...
//!     let lines = ["alpha", "beta", "gamma"].map(|s| Ok(s.to_string()));
//!     let source = BlockingSource::from_iter(lines, &bridge);
//!
//!     // ...delivered asynchronously, then consumed by a blocking iterator.
//!     for line in to_blocking(&source, bridge.capacity())? {
//!         println!("{}", line?);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Service surfaces
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use sluice::service::{BlockingService, StreamingService, from_blocking};
//! use sluice::{BridgeContext, RequestContext, source};
//!
//! struct Upper;
//!
//! impl BlockingService for Upper {
//!     fn handle(&self, _ctx: &RequestContext, request: Bytes) -> sluice::Result<Bytes> {
//!         Ok(Bytes::from(request.to_ascii_uppercase()))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> sluice::Result<()> {
//!     let service = from_blocking(Upper, &BridgeContext::current()?);
//!     let response = service
//!         .handle(&RequestContext::new(), Box::new(source::just(Bytes::from("hi"))))
//!         .await?;
//!     assert_eq!(sluice::service::aggregate(&response, 4).await?, "HI");
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod buffer;
pub mod config;
pub mod context;
pub mod deadline;
pub mod error;
pub mod offload;
pub mod service;
pub mod source;
pub mod telemetry;
pub mod testing;

// Re-export main types at crate root
pub use bridge::{
    BlockingIterator, BlockingProducer, BlockingSource, BridgeContext, IterProducer, SourceStream,
    into_stream, to_blocking,
};
pub use buffer::{BridgeState, CancelHandle, DemandGatedBuffer, Outcome};
pub use config::Config;
pub use context::{ContextKey, DEADLINE, RequestContext, propagate_deadline};
pub use deadline::Deadline;
pub use error::{BoxError, Result, SluiceError};
pub use offload::{ExecutionStrategy, IoExecutor, OffloadPolicy, OperationKind};
pub use source::{Source, Subscriber, Subscription, Terminal};
