use std::sync::atomic::{AtomicU8, Ordering};

/// How a bridge ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Completed,
    Failed,
    Cancelled,
}

impl Outcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Lifecycle of one bridge instance.
///
/// `Init → Subscribed → Draining → Terminated`. `Draining` means the
/// terminal signal has arrived from upstream but the consumer has not
/// observed it yet. `Terminated` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BridgeState {
    Init,
    Subscribed,
    Draining,
    Terminated(Outcome),
}

impl BridgeState {
    pub fn is_terminated(self) -> bool {
        matches!(self, Self::Terminated(_))
    }
}

const INIT: u8 = 0;
const SUBSCRIBED: u8 = 1;
const DRAINING: u8 = 2;
const COMPLETED: u8 = 3;
const FAILED: u8 = 4;
const CANCELLED: u8 = 5;

fn decode(code: u8) -> BridgeState {
    match code {
        INIT => BridgeState::Init,
        SUBSCRIBED => BridgeState::Subscribed,
        DRAINING => BridgeState::Draining,
        COMPLETED => BridgeState::Terminated(Outcome::Completed),
        FAILED => BridgeState::Terminated(Outcome::Failed),
        _ => BridgeState::Terminated(Outcome::Cancelled),
    }
}

fn encode(outcome: Outcome) -> u8 {
    match outcome {
        Outcome::Completed => COMPLETED,
        Outcome::Failed => FAILED,
        Outcome::Cancelled => CANCELLED,
    }
}

/// Atomic [`BridgeState`]; exactly one caller wins the move into
/// `Terminated`.
#[derive(Debug, Default)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn load(&self) -> BridgeState {
        decode(self.0.load(Ordering::Acquire))
    }

    /// `Init → Subscribed`.
    pub(crate) fn subscribe(&self) -> bool {
        self.0
            .compare_exchange(INIT, SUBSCRIBED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// `Init | Subscribed → Draining`.
    pub(crate) fn drain(&self) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |code| {
                (code == INIT || code == SUBSCRIBED).then_some(DRAINING)
            })
            .is_ok()
    }

    /// Move into `Terminated(outcome)` unless already terminated.
    pub(crate) fn terminate(&self, outcome: Outcome) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |code| {
                (code < COMPLETED).then_some(encode(outcome))
            })
            .is_ok()
    }
}
