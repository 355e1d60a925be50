use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, trace};

use super::{CancelGuard, Demand, Source, Subscriber, Subscription, Terminal};
use crate::offload::IoExecutor;
use crate::{Result, SluiceError};

type BoxStream<T> = Pin<Box<dyn Stream<Item = Result<T>> + Send>>;

/// A source driven by an asynchronous stream on the I/O threads.
///
/// The stream is polled only while the subscriber has outstanding demand.
/// Cancellation drops the stream, even while it is waiting for its next
/// item.
pub struct StreamSource<T> {
    stream: Mutex<Option<BoxStream<T>>>,
    handle: Handle,
}

impl<T> StreamSource<T> {
    pub fn new<S>(stream: S, executor: &IoExecutor) -> Self
    where
        S: Stream<Item = Result<T>> + Send + 'static,
    {
        Self {
            stream: Mutex::new(Some(Box::pin(stream))),
            handle: executor.handle().clone(),
        }
    }
}

impl<T: Send + 'static> Source<T> for StreamSource<T> {
    fn subscribe(&self, mut subscriber: Box<dyn Subscriber<T>>) -> Result<()> {
        let stream = self
            .stream
            .lock()
            .take()
            .ok_or(SluiceError::DuplicateSubscription)?;
        let gate = Arc::new(StreamGate::default());
        subscriber.on_subscribe(gate.clone());
        self.handle.spawn(drive(stream, subscriber, gate));
        Ok(())
    }
}

#[derive(Default)]
struct StreamGate {
    demand: Demand,
    guard: CancelGuard,
    finished: AtomicBool,
    demand_granted: Notify,
    cancel_requested: Notify,
}

impl StreamGate {
    fn is_cancelled(&self) -> bool {
        self.guard.is_cancelled()
    }
}

impl Subscription for StreamGate {
    fn request(&self, n: u64) -> Result<()> {
        if n == 0 {
            return Err(SluiceError::InvalidDemand);
        }
        if self.is_cancelled() || self.finished.load(Ordering::Acquire) {
            return Err(SluiceError::RequestAfterTermination);
        }
        self.demand.add(n);
        self.demand_granted.notify_one();
        Ok(())
    }

    fn cancel(&self) {
        if self.guard.cancel() {
            self.demand_granted.notify_one();
            self.cancel_requested.notify_one();
        }
    }
}

async fn drive<T>(
    mut stream: BoxStream<T>,
    mut subscriber: Box<dyn Subscriber<T>>,
    gate: Arc<StreamGate>,
) {
    loop {
        // Park until demand arrives.
        loop {
            if gate.is_cancelled() {
                trace!("stream source cancelled");
                return;
            }
            if gate.demand.try_take() {
                break;
            }
            gate.demand_granted.notified().await;
        }

        let next = tokio::select! {
            biased;
            _ = gate.cancel_requested.notified() => {
                trace!("stream source cancelled while awaiting item");
                return;
            }
            next = stream.next() => next,
        };
        let terminal = match next {
            Some(Ok(item)) => {
                if !gate.guard.deliver(|| subscriber.on_next(item)) {
                    return;
                }
                continue;
            }
            Some(Err(err)) => Terminal::Failed(err),
            None => Terminal::Completed,
        };
        gate.finished.store(true, Ordering::Release);
        debug!(completed = terminal.is_completed(), "stream source terminated");
        gate.guard.deliver(|| subscriber.on_terminal(terminal));
        return;
    }
}
