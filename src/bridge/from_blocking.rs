use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use super::{BlockingProducer, BridgeContext, IterProducer};
use crate::buffer::{BridgeState, DemandGatedBuffer, Outcome, Rejected};
use crate::offload::{ExecutionStrategy, OffloadPolicy, OperationKind};
use crate::source::{CancelGuard, Demand, Source, Subscriber, Subscription, Terminal};
use crate::telemetry;
use crate::{Result, SluiceError};

const BRIDGE: &str = "from_blocking";

/// A source backed by a blocking producer.
///
/// On subscription a worker on the blocking pool starts pulling from the
/// producer, one item per unit of downstream demand and never more than the
/// buffer can hold. Items reach the subscriber from a delivery task on the
/// I/O executor. The producer is closed exactly once, before the terminal
/// signal is delivered. A source dropped without ever being subscribed
/// closes its producer on the dropping thread.
pub struct BlockingSource<T> {
    producer: Mutex<Option<Box<dyn BlockingProducer<T>>>>,
    policy: OffloadPolicy,
    capacity: usize,
}

impl<T: Send + 'static> BlockingSource<T> {
    pub fn new<P>(producer: P, bridge: &BridgeContext) -> Self
    where
        P: BlockingProducer<T> + 'static,
    {
        // Production always blocks, whatever the caller's strategy says.
        let policy = bridge
            .policy()
            .merged(ExecutionStrategy::offload_none().with(OperationKind::ProducePayload));
        Self {
            producer: Mutex::new(Some(Box::new(producer))),
            policy,
            capacity: bridge.capacity(),
        }
    }

    /// Source pulling from a plain iterator on the blocking pool.
    pub fn from_iter<I>(items: I, bridge: &BridgeContext) -> Self
    where
        I: IntoIterator<Item = Result<T>>,
        I::IntoIter: Send + 'static,
    {
        Self::new(IterProducer(items.into_iter()), bridge)
    }
}

impl<T: Send + 'static> Source<T> for BlockingSource<T> {
    fn subscribe(&self, mut subscriber: Box<dyn Subscriber<T>>) -> Result<()> {
        let producer = self
            .producer
            .lock()
            .take()
            .ok_or(SluiceError::DuplicateSubscription)?;

        let gate = Arc::new(WorkerGate::default());
        let buffer = Arc::new(DemandGatedBuffer::labelled(self.capacity, BRIDGE));
        let guard = Arc::new(CancelGuard::default());
        buffer.attach(gate.clone());

        subscriber.on_subscribe(Arc::new(WorkerSubscription {
            gate: gate.clone(),
            buffer: buffer.clone(),
            guard: guard.clone(),
        }));
        self.policy
            .executor()
            .spawn(deliver(buffer.clone(), guard, subscriber));

        let worker = Worker {
            producer,
            gate,
            buffer,
            released: false,
        };
        debug!(capacity = self.capacity, "blocking source subscribed");
        self.policy
            .execute(OperationKind::ProducePayload, move || worker.run());
        Ok(())
    }
}

impl<T> Drop for BlockingSource<T> {
    fn drop(&mut self) {
        // Never subscribed: the producer is released on the dropping thread.
        if let Some(mut producer) = self.producer.get_mut().take() {
            release(producer.as_mut());
        }
    }
}

impl<T> fmt::Debug for BlockingSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingSource")
            .field("capacity", &self.capacity)
            .field("subscribed", &self.producer.lock().is_none())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct GateState {
    /// Demand granted by the downstream subscriber.
    downstream: u64,
    /// Free buffer slots, granted by the buffer as its upstream.
    room: u64,
    cancelled: bool,
}

/// Where the worker parks until it may pull the next item.
#[derive(Default)]
struct WorkerGate {
    state: Mutex<GateState>,
    wake: Condvar,
}

impl WorkerGate {
    fn grant(&self, n: u64) {
        let mut state = self.state.lock();
        state.downstream = state.downstream.saturating_add(n);
        self.wake.notify_one();
    }

    /// Block until one item may be produced. `false` once cancelled.
    fn acquire(&self) -> bool {
        let mut state = self.state.lock();
        loop {
            if state.cancelled {
                return false;
            }
            if state.downstream > 0 && state.room > 0 {
                if state.downstream != Demand::UNBOUNDED {
                    state.downstream -= 1;
                }
                state.room -= 1;
                return true;
            }
            self.wake.wait(&mut state);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }
}

/// The buffer's view of the worker: demand here is free buffer space.
impl Subscription for WorkerGate {
    fn request(&self, n: u64) -> Result<()> {
        if n == 0 {
            return Err(SluiceError::InvalidDemand);
        }
        let mut state = self.state.lock();
        if state.cancelled {
            return Err(SluiceError::RequestAfterTermination);
        }
        state.room = state.room.saturating_add(n);
        self.wake.notify_one();
        Ok(())
    }

    fn cancel(&self) {
        let mut state = self.state.lock();
        if !state.cancelled {
            state.cancelled = true;
            self.wake.notify_all();
        }
    }
}

/// Handed to the downstream subscriber.
struct WorkerSubscription<T> {
    gate: Arc<WorkerGate>,
    buffer: Arc<DemandGatedBuffer<T>>,
    guard: Arc<CancelGuard>,
}

impl<T: Send + 'static> Subscription for WorkerSubscription<T> {
    fn request(&self, n: u64) -> Result<()> {
        if n == 0 {
            return Err(SluiceError::InvalidDemand);
        }
        if self.buffer.state().is_terminated() || self.gate.is_cancelled() {
            return Err(SluiceError::RequestAfterTermination);
        }
        self.gate.grant(n);
        Ok(())
    }

    fn cancel(&self) {
        // Fence off delivery first so no item follows this call.
        self.guard.cancel();
        if self.buffer.cancel() {
            trace!(bridge = BRIDGE, "downstream cancelled");
        }
        self.gate.cancel();
    }
}

struct Worker<T> {
    producer: Box<dyn BlockingProducer<T>>,
    gate: Arc<WorkerGate>,
    buffer: Arc<DemandGatedBuffer<T>>,
    released: bool,
}

impl<T> Worker<T> {
    fn run(mut self) {
        let terminal = self.produce();
        self.released = true;
        release(self.producer.as_mut());
        match terminal {
            Some(terminal) => {
                debug!(
                    bridge = BRIDGE,
                    completed = terminal.is_completed(),
                    "blocking producer finished"
                );
                self.buffer.signal_terminal(terminal);
            }
            None => trace!(bridge = BRIDGE, "blocking producer stopped by cancellation"),
        }
    }

    /// Pull until exhaustion, failure or cancellation (`None`).
    fn produce(&mut self) -> Option<Terminal> {
        loop {
            if !self.gate.acquire() {
                return None;
            }
            let producer = &mut self.producer;
            let pulled = match catch_unwind(AssertUnwindSafe(|| producer.pull())) {
                Ok(pulled) => pulled,
                Err(panic) => return Some(Terminal::Failed(SluiceError::from_panic(panic))),
            };
            match pulled {
                Ok(Some(item)) => match self.buffer.offer(item) {
                    Ok(()) => {}
                    Err(Rejected::Closed(_)) => return None,
                    Err(Rejected::NoDemand(_)) => {
                        return Some(Terminal::Failed(SluiceError::DemandExceeded {
                            capacity: self.buffer.capacity(),
                        }));
                    }
                },
                Ok(None) => return Some(Terminal::Completed),
                Err(err) => return Some(Terminal::Failed(err)),
            }
        }
    }
}

impl<T> Drop for Worker<T> {
    fn drop(&mut self) {
        // The closure never ran, e.g. the blocking pool was shut down.
        if !self.released {
            self.released = true;
            release(self.producer.as_mut());
            self.buffer.abort(SluiceError::ExecutorShutdown);
        }
    }
}

/// Close `producer`, logging and counting failures. Never fails.
fn release<T>(producer: &mut dyn BlockingProducer<T>) {
    let closed = match catch_unwind(AssertUnwindSafe(|| producer.close())) {
        Ok(closed) => closed,
        Err(panic) => Err(SluiceError::from_panic(panic)),
    };
    match closed {
        Ok(()) => trace!(bridge = BRIDGE, "blocking producer released"),
        Err(err) => {
            let err = SluiceError::ResourceRelease(err.to_string());
            warn!(bridge = BRIDGE, error = %err, "producer release failed");
            metrics::counter!(telemetry::RELEASE_FAILURES_TOTAL).increment(1);
        }
    }
}

/// Forward buffered items to the subscriber on the I/O executor.
async fn deliver<T: Send + 'static>(
    buffer: Arc<DemandGatedBuffer<T>>,
    guard: Arc<CancelGuard>,
    mut subscriber: Box<dyn Subscriber<T>>,
) {
    loop {
        match buffer.recv().await {
            Ok(Some(item)) => {
                if !guard.deliver(|| subscriber.on_next(item)) {
                    return;
                }
            }
            Ok(None) => {
                if buffer.state() == BridgeState::Terminated(Outcome::Completed) {
                    guard.deliver(|| subscriber.on_terminal(Terminal::Completed));
                }
                return;
            }
            Err(err) => {
                guard.deliver(|| subscriber.on_terminal(Terminal::Failed(err)));
                return;
            }
        }
    }
}
