//! Tests for the demand-gated buffer.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sluice::buffer::{BridgeState, DemandGatedBuffer, Outcome, Rejected};
use sluice::testing::TestSubscription;
use sluice::{SluiceError, Subscriber, Terminal};

fn attached(capacity: usize) -> (Arc<DemandGatedBuffer<u32>>, Arc<TestSubscription>) {
    let buffer = Arc::new(DemandGatedBuffer::new(capacity));
    let upstream = TestSubscription::new();
    buffer.attach(upstream.clone());
    (buffer, upstream)
}

// ============================================================================
// Demand accounting
// ============================================================================

#[test]
fn attach_prefetches_capacity() {
    let (buffer, upstream) = attached(4);
    assert_eq!(upstream.requested(), 4);
    assert_eq!(upstream.request_calls(), 1);
    assert_eq!(buffer.outstanding(), 4);
    assert_eq!(buffer.state(), BridgeState::Subscribed);
}

#[test]
fn take_replenishes_one() {
    let (buffer, upstream) = attached(4);
    buffer.offer(1).unwrap();
    buffer.offer(2).unwrap();
    assert_eq!(buffer.outstanding(), 2);

    assert_eq!(buffer.take(), Some(1));
    assert_eq!(upstream.requested(), 5);
    assert_eq!(buffer.outstanding(), 3);
}

#[test]
fn occupancy_never_exceeds_capacity() {
    let (buffer, _upstream) = attached(2);
    buffer.offer(1).unwrap();
    buffer.offer(2).unwrap();
    assert_eq!(buffer.offer(3), Err(Rejected::NoDemand(3)));
    assert_eq!(buffer.len(), 2);
}

#[test]
fn offer_before_attach_has_no_demand() {
    let buffer = DemandGatedBuffer::new(4);
    assert_eq!(buffer.offer(7), Err(Rejected::NoDemand(7)));
}

#[test]
fn second_upstream_is_cancelled() {
    let (buffer, first) = attached(2);
    let second = TestSubscription::new();
    buffer.attach(second.clone());
    assert!(second.is_cancelled());
    assert_eq!(second.requested(), 0);
    assert!(!first.is_cancelled());
}

#[test]
fn capacity_is_at_least_one() {
    let buffer: DemandGatedBuffer<u32> = DemandGatedBuffer::new(0);
    assert_eq!(buffer.capacity(), 1);
}

// ============================================================================
// Terminal signals
// ============================================================================

#[test]
fn failure_is_reported_after_buffered_items() {
    let (buffer, _upstream) = attached(4);
    for i in 1..=3 {
        buffer.offer(i).unwrap();
    }
    assert!(buffer.signal_terminal(Terminal::Failed(SluiceError::source("boom"))));
    assert_eq!(buffer.state(), BridgeState::Draining);

    for i in 1..=3 {
        assert_eq!(buffer.poll_blocking(None).unwrap(), Some(i));
    }
    let err = buffer.poll_blocking(None).unwrap_err();
    assert!(err.to_string().contains("boom"));
    assert_eq!(buffer.state(), BridgeState::Terminated(Outcome::Failed));

    // Reported exactly once.
    assert_eq!(buffer.poll_blocking(None).unwrap(), None);
}

#[test]
fn completion_on_empty_buffer_exhausts() {
    let (buffer, _upstream) = attached(4);
    buffer.signal_terminal(Terminal::Completed);
    assert!(!buffer.wait_blocking(None).unwrap());
    assert_eq!(buffer.state(), BridgeState::Terminated(Outcome::Completed));
}

#[test]
fn second_terminal_is_dropped() {
    let (buffer, _upstream) = attached(4);
    assert!(buffer.signal_terminal(Terminal::Completed));
    assert!(!buffer.signal_terminal(Terminal::Failed(SluiceError::source("late"))));
    assert_eq!(buffer.poll_blocking(None).unwrap(), None);
}

#[test]
fn no_replenish_after_terminal() {
    let (buffer, upstream) = attached(2);
    buffer.offer(1).unwrap();
    buffer.signal_terminal(Terminal::Completed);
    assert_eq!(buffer.take(), Some(1));
    assert_eq!(upstream.requested(), 2);
}

// ============================================================================
// Cancellation
// ============================================================================

#[test]
fn cancel_drops_buffered_items() {
    let (buffer, upstream) = attached(4);
    for i in 1..=3 {
        buffer.offer(i).unwrap();
    }
    assert!(buffer.cancel());
    assert!(buffer.is_empty());
    assert!(upstream.is_cancelled());
    assert_eq!(buffer.state(), BridgeState::Terminated(Outcome::Cancelled));
    assert_eq!(buffer.poll_blocking(None).unwrap(), None);
    assert_eq!(buffer.offer(4), Err(Rejected::Closed(4)));
}

#[test]
fn cancel_wins_over_pending_terminal() {
    let (buffer, _upstream) = attached(4);
    buffer.offer(1).unwrap();
    buffer.signal_terminal(Terminal::Failed(SluiceError::source("boom")));
    assert!(buffer.cancel());
    assert_eq!(buffer.poll_blocking(None).unwrap(), None);
}

#[test]
fn cancel_is_idempotent() {
    let (buffer, _upstream) = attached(4);
    assert!(buffer.cancel());
    assert!(!buffer.cancel());
    assert!(!buffer.cancel_handle().cancel());
}

#[test]
fn cancel_before_attach_cancels_upstream_on_arrival() {
    let buffer: DemandGatedBuffer<u32> = DemandGatedBuffer::new(4);
    buffer.cancel();
    let upstream = TestSubscription::new();
    buffer.attach(upstream.clone());
    assert!(upstream.is_cancelled());
    assert_eq!(upstream.requested(), 0);
}

#[test]
fn cancel_wakes_blocked_consumer() {
    let (buffer, _upstream) = attached(4);
    let consumer = {
        let buffer = buffer.clone();
        thread::spawn(move || buffer.poll_blocking(None))
    };
    thread::sleep(Duration::from_millis(20));
    buffer.cancel();
    assert_eq!(consumer.join().unwrap().unwrap(), None);
}

// ============================================================================
// Waiting
// ============================================================================

#[test]
fn blocked_consumer_wakes_on_offer() {
    let (buffer, _upstream) = attached(4);
    let consumer = {
        let buffer = buffer.clone();
        thread::spawn(move || buffer.poll_blocking(None))
    };
    thread::sleep(Duration::from_millis(20));
    buffer.offer(42).unwrap();
    assert_eq!(consumer.join().unwrap().unwrap(), Some(42));
}

#[test]
fn timeout_leaves_buffer_usable() {
    let (buffer, _upstream) = attached(4);
    let err = buffer
        .poll_blocking(Some(Duration::from_millis(10)))
        .unwrap_err();
    assert!(matches!(err, SluiceError::TimedOut(_)));
    assert_eq!(buffer.state(), BridgeState::Subscribed);

    buffer.offer(5).unwrap();
    assert_eq!(
        buffer.poll_blocking(Some(Duration::from_millis(10))).unwrap(),
        Some(5)
    );
}

#[tokio::test]
async fn recv_suspends_until_offer() {
    let (buffer, _upstream) = attached(2);
    let consumer = {
        let buffer = buffer.clone();
        tokio::spawn(async move { buffer.recv().await })
    };
    tokio::task::yield_now().await;
    buffer.offer(9).unwrap();
    assert_eq!(consumer.await.unwrap().unwrap(), Some(9));

    buffer.signal_terminal(Terminal::Completed);
    assert_eq!(buffer.recv().await.unwrap(), None);
}

// ============================================================================
// Subscriber side
// ============================================================================

#[test]
fn emission_without_demand_aborts() {
    let buffer = Arc::new(DemandGatedBuffer::new(1));
    let upstream = TestSubscription::new();
    let mut subscriber = buffer.subscriber();
    subscriber.on_subscribe(upstream.clone());
    subscriber.on_next(1);
    subscriber.on_next(2);

    assert!(upstream.is_cancelled());
    assert_eq!(buffer.poll_blocking(None).unwrap(), Some(1));
    let err = buffer.poll_blocking(None).unwrap_err();
    assert!(matches!(err, SluiceError::DemandExceeded { capacity: 1 }));
    assert!(err.is_protocol_violation());
}

#[test]
fn items_after_cancel_are_discarded() {
    let buffer = Arc::new(DemandGatedBuffer::new(2));
    let mut subscriber = buffer.subscriber();
    subscriber.on_subscribe(TestSubscription::new());
    buffer.cancel();
    subscriber.on_next(1);
    subscriber.on_terminal(Terminal::Completed);
    assert!(buffer.is_empty());
    assert_eq!(buffer.state(), BridgeState::Terminated(Outcome::Cancelled));
}
