use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::OperationKind;
use crate::config::ExecutorConfig;
use crate::telemetry;
use crate::{Result, SluiceError};

thread_local! {
    static MAY_BLOCK: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread drives asynchronous work.
///
/// Any thread inside a tokio runtime context counts, whichever runtime it
/// belongs to, unless it is running work on the blocking pool of an
/// [`IoExecutor`] or inside [`may_block`].
pub fn is_io_thread() -> bool {
    !MAY_BLOCK.with(Cell::get) && Handle::try_current().is_ok()
}

/// Fail with [`SluiceError::BlockingOnIoThread`] when called from an I/O
/// thread.
pub fn ensure_may_block(kind: OperationKind) -> Result<()> {
    if is_io_thread() {
        metrics::counter!(telemetry::PROTOCOL_VIOLATIONS_TOTAL, "bridge" => "offload")
            .increment(1);
        return Err(SluiceError::BlockingOnIoThread(kind));
    }
    Ok(())
}

/// Run `f` with the current thread allowed to block.
///
/// Blocking-pool threads of an [`IoExecutor`] are marked automatically.
/// Use this for blocking threads started elsewhere, e.g. a plain
/// `tokio::task::spawn_blocking` or a `block_in_place` section.
pub fn may_block<R>(f: impl FnOnce() -> R) -> R {
    let _guard = MarkerGuard::enter();
    f()
}

/// Restores the previous marker even if the marked work panics.
struct MarkerGuard {
    previous: bool,
}

impl MarkerGuard {
    fn enter() -> Self {
        let previous = MAY_BLOCK.with(|flag| flag.replace(true));
        Self { previous }
    }
}

impl Drop for MarkerGuard {
    fn drop(&mut self) {
        let previous = self.previous;
        MAY_BLOCK.with(|flag| flag.set(previous));
    }
}

/// Shuts an owned runtime down without blocking, so the last clone may be
/// dropped from any context.
struct OwnedRuntime(Option<Runtime>);

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

/// Fixed pool of non-blocking I/O threads plus a bounded blocking pool.
#[derive(Clone)]
pub struct IoExecutor {
    handle: Handle,
    owned: Option<Arc<OwnedRuntime>>,
}

impl IoExecutor {
    /// Build a dedicated runtime from configuration.
    pub fn new(config: &ExecutorConfig) -> Result<Self> {
        let io_threads = config.io_threads();
        let runtime = Builder::new_multi_thread()
            .worker_threads(io_threads)
            .max_blocking_threads(config.max_blocking_threads)
            .thread_name(config.thread_name.clone())
            .enable_all()
            .build()
            .map_err(|e| {
                SluiceError::Configuration(format!("failed to build I/O executor: {e}"))
            })?;
        debug!(
            io_threads,
            max_blocking_threads = config.max_blocking_threads,
            thread_name = %config.thread_name,
            "created I/O executor"
        );
        Ok(Self {
            handle: runtime.handle().clone(),
            owned: Some(Arc::new(OwnedRuntime(Some(runtime)))),
        })
    }

    /// Wrap an existing runtime; the caller keeps ownership of it.
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            owned: None,
        }
    }

    /// Wrap the runtime of the current async context.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn current() -> Self {
        Self::from_handle(Handle::current())
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Spawn non-blocking work on the I/O threads.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(fut)
    }

    /// Spawn work that may block on the blocking pool.
    pub fn spawn_blocking<F, R>(&self, f: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        trace!("executor.spawn_blocking");
        self.handle.spawn_blocking(move || may_block(f))
    }
}

impl fmt::Debug for IoExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoExecutor")
            .field("owned", &self.owned.is_some())
            .finish_non_exhaustive()
    }
}
