//! Offloading policy: which thread runs which piece of bridge work.
//!
//! An [`ExecutionStrategy`] declares which operations may block. The
//! [`OffloadPolicy`] consults it for every call: operations that may block
//! are submitted to the blocking pool of the [`IoExecutor`], everything else
//! runs inline on the caller's thread. Blocking entry points additionally
//! refuse to run on a thread that is currently driving I/O futures (see
//! [`is_io_thread`]).

mod executor;

use std::fmt;

use bitflags::bitflags;
use serde::Deserialize;
use tracing::trace;

use crate::telemetry;
use crate::{Result, SluiceError};

pub use executor::{IoExecutor, ensure_may_block, is_io_thread, may_block};

/// An operation whose execution thread is decided by the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Invoking a request handler.
    ReceiveRequest,
    /// Writing a response.
    SendResponse,
    /// Pulling items out of a payload producer.
    ProducePayload,
    /// Consuming items of a payload.
    ConsumePayload,
}

impl OperationKind {
    pub const ALL: [OperationKind; 4] = [
        Self::ReceiveRequest,
        Self::SendResponse,
        Self::ProducePayload,
        Self::ConsumePayload,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReceiveRequest => "receive_request",
            Self::SendResponse => "send_response",
            Self::ProducePayload => "produce_payload",
            Self::ConsumePayload => "consume_payload",
        }
    }

    const fn flag(self) -> Offloads {
        match self {
            Self::ReceiveRequest => Offloads::RECEIVE_REQUEST,
            Self::SendResponse => Offloads::SEND_RESPONSE,
            Self::ProducePayload => Offloads::PRODUCE_PAYLOAD,
            Self::ConsumePayload => Offloads::CONSUME_PAYLOAD,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags! {
    /// Set of operations that are allowed to block and therefore offloaded.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Offloads: u8 {
        const RECEIVE_REQUEST = 1 << 0;
        const SEND_RESPONSE = 1 << 1;
        const PRODUCE_PAYLOAD = 1 << 2;
        const CONSUME_PAYLOAD = 1 << 3;
    }
}

/// Capability descriptor stating which operations may block.
///
/// ```rust
/// # use sluice::offload::{ExecutionStrategy, OperationKind};
/// let strategy = ExecutionStrategy::offload_none()
///     .with(OperationKind::ProducePayload);
/// assert!(strategy.offloads(OperationKind::ProducePayload));
/// assert!(!strategy.offloads(OperationKind::SendResponse));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ExecutionStrategy {
    offloads: Offloads,
}

impl ExecutionStrategy {
    /// Nothing may block; everything runs inline.
    pub const fn offload_none() -> Self {
        Self {
            offloads: Offloads::empty(),
        }
    }

    /// Every operation may block.
    pub const fn offload_all() -> Self {
        Self {
            offloads: Offloads::all(),
        }
    }

    /// Mark `kind` as possibly blocking.
    pub fn with(mut self, kind: OperationKind) -> Self {
        self.offloads |= kind.flag();
        self
    }

    /// Whether `kind` is offloaded under this strategy.
    pub fn offloads(&self, kind: OperationKind) -> bool {
        self.offloads.contains(kind.flag())
    }

    /// The raw flag set.
    pub fn flags(&self) -> Offloads {
        self.offloads
    }

    /// Combine two strategies.
    ///
    /// The result offloads everything either side offloads, so composing a
    /// derived client or service never loses an offload one side requires.
    pub fn merge(self, other: ExecutionStrategy) -> Self {
        Self {
            offloads: self.offloads | other.offloads,
        }
    }
}

impl FromIterator<OperationKind> for ExecutionStrategy {
    fn from_iter<I: IntoIterator<Item = OperationKind>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::offload_none(), |strategy, kind| strategy.with(kind))
    }
}

/// Decides, per call, whether work runs inline or on the blocking pool.
#[derive(Clone)]
pub struct OffloadPolicy {
    strategy: ExecutionStrategy,
    executor: IoExecutor,
}

impl OffloadPolicy {
    pub fn new(strategy: ExecutionStrategy, executor: IoExecutor) -> Self {
        Self { strategy, executor }
    }

    pub fn strategy(&self) -> ExecutionStrategy {
        self.strategy
    }

    pub fn executor(&self) -> &IoExecutor {
        &self.executor
    }

    /// Policy with `other` merged into its strategy.
    pub fn merged(&self, other: ExecutionStrategy) -> Self {
        Self {
            strategy: self.strategy.merge(other),
            executor: self.executor.clone(),
        }
    }

    pub fn should_offload(&self, kind: OperationKind) -> bool {
        self.strategy.offloads(kind)
    }

    /// Run `work` according to the policy, without waiting for it.
    pub fn execute<F>(&self, kind: OperationKind, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.should_offload(kind) {
            self.record_offload(kind);
            // Detached: completion is reported by the work itself.
            drop(self.executor.spawn_blocking(work));
        } else {
            work();
        }
    }

    /// Run `work` according to the policy and wait for its result.
    ///
    /// A panic inside offloaded work is returned as
    /// [`SluiceError::Panicked`].
    pub async fn run<F, R>(&self, kind: OperationKind, work: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if !self.should_offload(kind) {
            return Ok(work());
        }
        self.record_offload(kind);
        self.executor.spawn_blocking(work).await.map_err(|err| {
            if err.is_panic() {
                SluiceError::from_panic(err.into_panic())
            } else {
                SluiceError::ExecutorShutdown
            }
        })
    }

    fn record_offload(&self, kind: OperationKind) {
        trace!(operation = kind.as_str(), "offloading to blocking pool");
        metrics::counter!(telemetry::OFFLOADS_TOTAL, "operation" => kind.as_str()).increment(1);
    }
}

impl fmt::Debug for OffloadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OffloadPolicy")
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}
