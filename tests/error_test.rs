//! Tests for error classification and display.

use std::time::Duration;

use sluice::{OperationKind, SluiceError};

#[test]
fn source_wraps_strings_and_errors() {
    let err = SluiceError::source("disk on fire");
    assert_eq!(err.to_string(), "source failed: disk on fire");

    let io = std::io::Error::other("broken pipe");
    let err: SluiceError = io.into();
    assert!(matches!(err, SluiceError::Source(_)));
    assert!(err.to_string().contains("broken pipe"));
}

#[test]
fn producer_failures_are_source_failures() {
    assert!(SluiceError::source("x").is_source_failure());
    assert!(SluiceError::Panicked("x".into()).is_source_failure());
    assert!(!SluiceError::ExecutorShutdown.is_source_failure());
    assert!(!SluiceError::DuplicateSubscription.is_source_failure());
}

#[test]
fn protocol_violations_are_classified() {
    let violations = [
        SluiceError::DuplicateSubscription,
        SluiceError::InvalidDemand,
        SluiceError::RequestAfterTermination,
        SluiceError::DemandExceeded { capacity: 2 },
        SluiceError::BlockingOnIoThread(OperationKind::ConsumePayload),
    ];
    for err in &violations {
        assert!(err.is_protocol_violation(), "{err} should be a violation");
        assert!(!err.is_source_failure());
    }

    let others = [
        SluiceError::source("boom"),
        SluiceError::ResourceRelease("close failed".into()),
        SluiceError::TimedOut(Duration::from_millis(5)),
        SluiceError::ExecutorShutdown,
        SluiceError::Configuration("bad".into()),
    ];
    for err in &others {
        assert!(!err.is_protocol_violation(), "{err} should not be a violation");
    }
}

#[test]
fn display_names_the_operation_and_capacity() {
    assert_eq!(
        SluiceError::BlockingOnIoThread(OperationKind::ProducePayload).to_string(),
        "blocking produce_payload attempted on an I/O thread"
    );
    assert_eq!(
        SluiceError::DemandExceeded { capacity: 4 }.to_string(),
        "item emitted without demand (capacity 4)"
    );
    assert!(
        SluiceError::TimedOut(Duration::from_millis(250))
            .to_string()
            .contains("250ms")
    );
}
