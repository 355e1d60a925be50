//! Tests for the async-to-blocking bridge.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sluice::config::ExecutorConfig;
use sluice::offload::may_block;
use sluice::source;
use sluice::testing::{TestSource, TestSubscription};
use sluice::{
    BridgeState, Deadline, IoExecutor, OperationKind, Outcome, SluiceError, to_blocking,
};

fn hand_driven(capacity: usize) -> (
    Arc<TestSource<String>>,
    Arc<TestSubscription>,
    sluice::BlockingIterator<String>,
) {
    let source = Arc::new(TestSource::new());
    let iter = to_blocking(&source, capacity).unwrap();
    let subscription = TestSubscription::new();
    assert!(source.on_subscribe(subscription.clone()));
    (source, subscription, iter)
}

// ============================================================================
// Basic iteration
// ============================================================================

#[test]
fn no_payload_is_exhausted_on_first_pull() {
    let mut iter = to_blocking(&source::empty::<String>(), 4).unwrap();
    assert!(!iter.has_next().unwrap());
    assert_eq!(iter.next_item().unwrap(), None);
}

#[test]
fn single_chunk() {
    let mut iter = to_blocking(&source::just("hello".to_string()), 4).unwrap();
    assert!(iter.has_next().unwrap());
    assert_eq!(iter.next_item().unwrap().as_deref(), Some("hello"));
    assert!(!iter.has_next().unwrap());
    assert_eq!(iter.state(), BridgeState::Terminated(Outcome::Completed));
}

#[test]
fn failure_before_first_item_is_raised_by_first_pull() {
    let mut iter =
        to_blocking(&source::failed::<String>(SluiceError::source("boom")), 4).unwrap();
    let err = iter.has_next().unwrap_err();
    assert!(err.is_source_failure());
    assert!(err.to_string().contains("boom"));
    assert!(!iter.has_next().unwrap());
}

#[test]
fn preserves_order_across_many_replenishments() {
    let items = to_blocking(&source::from_iter((0..200u32).map(Ok)), 3)
        .unwrap()
        .collect::<sluice::Result<Vec<_>>>()
        .unwrap();
    assert_eq!(items, (0..200).collect::<Vec<_>>());
}

#[test]
fn iterator_yields_failure_once_then_ends() {
    let items = vec![Ok(1u32), Ok(2), Err(SluiceError::source("boom"))];
    let mut iter = to_blocking(&source::from_iter(items), 4).unwrap();
    assert_eq!(iter.next().unwrap().unwrap(), 1);
    assert_eq!(iter.next().unwrap().unwrap(), 2);
    assert!(iter.next().unwrap().is_err());
    assert!(iter.next().is_none());
    assert!(iter.is_closed());
}

#[test]
fn duplicate_subscription_is_refused() {
    let source = source::just(1u32);
    let _first = to_blocking(&source, 4).unwrap();
    let err = to_blocking(&source, 4).unwrap_err();
    assert!(matches!(err, SluiceError::DuplicateSubscription));
}

// ============================================================================
// Demand
// ============================================================================

#[test]
fn prefetches_capacity_and_replenishes_per_item() {
    let (source, subscription, mut iter) = hand_driven(4);
    assert_eq!(subscription.requested(), 4);

    source.on_next("a".into());
    source.on_next("b".into());
    assert_eq!(iter.next_item().unwrap().as_deref(), Some("a"));
    assert_eq!(subscription.requested(), 5);
    assert_eq!(iter.buffered(), 1);
}

#[test]
fn emission_beyond_capacity_fails_the_bridge() {
    let (source, subscription, mut iter) = hand_driven(1);
    source.on_next("a".into());
    source.on_next("b".into());

    assert!(subscription.is_cancelled());
    assert_eq!(iter.next_item().unwrap().as_deref(), Some("a"));
    let err = iter.next_item().unwrap_err();
    assert!(matches!(err, SluiceError::DemandExceeded { capacity: 1 }));
}

// ============================================================================
// Terminal ordering
// ============================================================================

#[test]
fn drains_buffered_items_before_failure() {
    let (source, _subscription, mut iter) = hand_driven(4);
    source.on_next("1".into());
    source.on_next("2".into());
    source.on_next("3".into());
    source.on_error(SluiceError::source("boom"));

    for expected in ["1", "2", "3"] {
        assert!(iter.has_next().unwrap());
        assert_eq!(iter.next_item().unwrap().as_deref(), Some(expected));
    }
    assert!(iter.has_next().is_err());
    assert!(!iter.has_next().unwrap());
}

#[test]
fn completion_after_items() {
    let (source, _subscription, mut iter) = hand_driven(4);
    source.on_next("x".into());
    source.on_complete();
    assert_eq!(iter.state(), BridgeState::Draining);
    assert_eq!(iter.next_item().unwrap().as_deref(), Some("x"));
    assert_eq!(iter.next_item().unwrap(), None);
    assert_eq!(iter.state(), BridgeState::Terminated(Outcome::Completed));
}

// ============================================================================
// Cancellation
// ============================================================================

#[test]
fn close_propagates_cancellation() {
    let (source, subscription, mut iter) = hand_driven(4);
    source.on_next("hello".into());
    assert!(iter.has_next().unwrap());
    iter.close();
    assert!(subscription.is_cancelled());
}

#[test]
fn close_mid_stream_discards_remaining_items() {
    let (source, subscription, mut iter) = hand_driven(4);
    for item in ["1", "2", "3"] {
        source.on_next(item.into());
    }
    assert_eq!(iter.next_item().unwrap().as_deref(), Some("1"));
    iter.close();

    assert!(subscription.is_cancelled());
    assert_eq!(iter.buffered(), 0);
    assert_eq!(iter.next_item().unwrap(), None);
    assert!(!iter.has_next().unwrap());
    assert_eq!(iter.state(), BridgeState::Terminated(Outcome::Cancelled));

    // Late signals from the source are ignored.
    source.on_next("4".into());
    source.on_complete();
    assert_eq!(iter.next_item().unwrap(), None);
}

#[test]
fn close_is_idempotent() {
    let (_source, subscription, mut iter) = hand_driven(4);
    iter.close();
    iter.close();
    assert!(iter.is_closed());
    assert!(subscription.is_cancelled());
}

#[test]
fn drop_cancels_upstream() {
    let (_source, subscription, iter) = hand_driven(4);
    drop(iter);
    assert!(subscription.is_cancelled());
}

#[test]
fn cancel_handle_unblocks_consumer() {
    let (_source, subscription, mut iter) = hand_driven(4);
    let handle = iter.cancel_handle();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        handle.cancel()
    });
    assert!(!iter.has_next().unwrap());
    assert!(canceller.join().unwrap());
    assert!(subscription.is_cancelled());
}

// ============================================================================
// Timeouts and deadlines
// ============================================================================

#[test]
fn timeout_keeps_the_bridge_alive() {
    let (source, subscription, mut iter) = hand_driven(4);
    let err = iter
        .has_next_timeout(Duration::from_millis(10))
        .unwrap_err();
    assert!(matches!(err, SluiceError::TimedOut(_)));
    assert!(!subscription.is_cancelled());

    source.on_next("late".into());
    assert_eq!(
        iter.next_timeout(Duration::from_secs(1)).unwrap().as_deref(),
        Some("late")
    );
}

#[test]
fn unbounded_timeout_waits_like_untimed() {
    let (source, _subscription, mut iter) = hand_driven(4);
    let producer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        source.on_next("late".into());
    });
    assert!(iter.has_next_timeout(Duration::MAX).unwrap());
    assert_eq!(iter.next_item().unwrap().as_deref(), Some("late"));
    producer.join().unwrap();
}

#[test]
fn unbounded_timeout_ends_on_cancel() {
    let (_source, subscription, mut iter) = hand_driven(4);
    let handle = iter.cancel_handle();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        handle.cancel()
    });
    assert!(!iter.has_next_timeout(Duration::MAX).unwrap());
    assert!(canceller.join().unwrap());
    assert!(subscription.is_cancelled());
}

#[test]
fn deadline_cancels_like_close() {
    let executor = IoExecutor::new(&ExecutorConfig::default()).unwrap();
    let (_source, subscription, mut iter) = hand_driven(4);
    let _deadline = Deadline::cancel_after(
        iter.cancel_handle(),
        Duration::from_millis(20),
        &executor,
    );
    assert!(!iter.has_next().unwrap());
    assert!(subscription.is_cancelled());
    assert_eq!(iter.state(), BridgeState::Terminated(Outcome::Cancelled));
}

// ============================================================================
// Threads
// ============================================================================

#[test]
fn producer_on_another_thread_within_demand() {
    let (source, subscription, iter) = hand_driven(2);
    let producer = thread::spawn(move || {
        for i in 0..20u64 {
            while subscription.requested() <= i {
                thread::yield_now();
            }
            source.on_next(i.to_string());
        }
        source.on_complete();
    });
    let seen = iter.collect::<sluice::Result<Vec<_>>>().unwrap();
    producer.join().unwrap();
    assert_eq!(seen, (0..20).map(|i| i.to_string()).collect::<Vec<_>>());
}

#[test]
fn pulling_on_an_io_thread_is_refused() {
    let executor = IoExecutor::new(&ExecutorConfig::default()).unwrap();
    let (_source, _subscription, mut iter) = hand_driven(4);
    let io = executor.clone();
    let result = executor.handle().block_on(async move {
        io.spawn(async move { iter.has_next() })
            .await
            .unwrap()
    });
    assert!(matches!(
        result,
        Err(SluiceError::BlockingOnIoThread(OperationKind::ConsumePayload))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn pulling_inside_a_runtime_task_is_refused() {
    let (_source, _subscription, mut iter) = hand_driven(4);
    let result = tokio::spawn(async move { iter.has_next() }).await.unwrap();
    assert!(matches!(
        result,
        Err(SluiceError::BlockingOnIoThread(OperationKind::ConsumePayload))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn pulling_on_the_runtime_entry_thread_is_refused() {
    let (source, _subscription, mut iter) = hand_driven(4);
    source.on_next("ready".into());
    assert!(matches!(
        iter.has_next(),
        Err(SluiceError::BlockingOnIoThread(OperationKind::ConsumePayload))
    ));
    // The refusal leaves the bridge usable.
    assert_eq!(
        may_block(|| iter.next_item()).unwrap().as_deref(),
        Some("ready")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn marked_blocking_work_may_pull() {
    let executor = IoExecutor::current();
    let (source, _subscription, iter) = hand_driven(4);
    source.on_next("a".into());
    source.on_complete();
    let items = executor
        .spawn_blocking(move || iter.collect::<sluice::Result<Vec<_>>>())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(items, vec!["a".to_string()]);
}
