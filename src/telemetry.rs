//! Telemetry metric name constants.
//!
//! Centralised metric names for sluice bridges. Consumers install their own
//! `metrics` recorder (e.g. prometheus, statsd); without a recorder
//! installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `sluice_`. Counters end in `_total`.
//!
//! # Common labels
//!
//! - `bridge`: which bridge emitted the metric: "to_blocking", "from_blocking",
//!   "stream", "buffer" or "offload"
//! - `outcome`: terminal outcome: "completed", "failed" or "cancelled"
//! - `operation`: offloaded operation kind (e.g. "produce_payload")

/// Items handed from a bridge buffer to its consumer.
///
/// Labels: `bridge`.
pub const ITEMS_DELIVERED_TOTAL: &str = "sluice_items_delivered_total";

/// Bridges that reached their terminal state.
///
/// Labels: `bridge`, `outcome` ("completed" | "failed" | "cancelled").
pub const TERMINALS_TOTAL: &str = "sluice_terminals_total";

/// Cancellations that won the race to terminate a bridge.
///
/// Labels: `bridge`.
pub const CANCELLATIONS_TOTAL: &str = "sluice_cancellations_total";

/// Work submitted to the blocking pool by the offloading policy.
///
/// Labels: `operation`.
pub const OFFLOADS_TOTAL: &str = "sluice_offloads_total";

/// Failures while closing a blocking producer.
pub const RELEASE_FAILURES_TOTAL: &str = "sluice_release_failures_total";

/// Protocol violations detected by a bridge (emission without demand,
/// blocking on an I/O thread, ...).
///
/// Labels: `bridge`.
pub const PROTOCOL_VIOLATIONS_TOTAL: &str = "sluice_protocol_violations_total";
