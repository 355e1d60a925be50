//! Sluice error types

use std::time::Duration;

use crate::offload::OperationKind;

/// Boxed error carried by a failed source.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Sluice error types
#[derive(Debug, thiserror::Error)]
pub enum SluiceError {
    // Producer-side failures
    #[error("source failed: {0}")]
    Source(BoxError),

    #[error("producer panicked: {0}")]
    Panicked(String),

    // Protocol violations
    #[error("source already has a subscriber")]
    DuplicateSubscription,

    #[error("demand must be greater than zero")]
    InvalidDemand,

    #[error("demand requested after cancellation or termination")]
    RequestAfterTermination,

    /// Upstream emitted an item with no outstanding demand, or past the
    /// buffer capacity.
    #[error("item emitted without demand (capacity {capacity})")]
    DemandExceeded { capacity: usize },

    #[error("blocking {0} attempted on an I/O thread")]
    BlockingOnIoThread(OperationKind),

    // Cleanup
    #[error("failed to release blocking producer: {0}")]
    ResourceRelease(String),

    // Soft errors
    #[error("no item available within {0:?}")]
    TimedOut(Duration),

    #[error("executor has shut down")]
    ExecutorShutdown,

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl SluiceError {
    /// Wrap an arbitrary producer error.
    pub fn source<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Source(err.into())
    }

    /// Whether this error reports a misuse of the subscription protocol.
    ///
    /// Protocol violations are raised synchronously by the caller that
    /// committed them and are never queued behind buffered items.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::DuplicateSubscription
                | Self::InvalidDemand
                | Self::RequestAfterTermination
                | Self::DemandExceeded { .. }
                | Self::BlockingOnIoThread(_)
        )
    }

    /// Whether this error originated in the producer.
    pub fn is_source_failure(&self) -> bool {
        matches!(self, Self::Source(_) | Self::Panicked(_))
    }

    /// Convert a panic payload caught with `catch_unwind` into an error.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::Panicked(msg)
    }
}

impl From<std::io::Error> for SluiceError {
    fn from(err: std::io::Error) -> Self {
        Self::Source(Box::new(err))
    }
}

/// Result type alias for sluice operations
pub type Result<T> = std::result::Result<T, SluiceError>;
