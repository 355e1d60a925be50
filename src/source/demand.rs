use std::sync::atomic::{AtomicU64, Ordering};

/// Outstanding demand counter.
///
/// Additions saturate at [`Demand::UNBOUNDED`]; once there, taking a unit
/// no longer decrements.
#[derive(Debug, Default)]
pub struct Demand(AtomicU64);

impl Demand {
    pub const UNBOUNDED: u64 = u64::MAX;

    pub fn new() -> Self {
        Self::default()
    }

    /// Add `n` units, returning the previous value.
    pub fn add(&self, n: u64) -> u64 {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(n))
            })
            .unwrap_or(Self::UNBOUNDED)
    }

    /// Take one unit if any is available.
    pub fn try_take(&self) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| match current {
                0 => None,
                Self::UNBOUNDED => Some(Self::UNBOUNDED),
                n => Some(n - 1),
            })
            .is_ok()
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    pub fn is_unbounded(&self) -> bool {
        self.get() == Self::UNBOUNDED
    }
}
