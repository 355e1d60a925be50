//! Request-scoped context passed explicitly through handler calls.
//!
//! A [`RequestContext`] is a small typed key/value map. Values are keyed by
//! a [`ContextKey`], which carries both a name and the value type, so a
//! lookup can never return a value of the wrong type. Cloning is cheap: the
//! map is shared until one of the clones is modified.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Typed key into a [`RequestContext`].
pub struct ContextKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for ContextKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ContextKey<T> {}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextKey({})", self.name)
    }
}

/// Point in time by which the current request should have completed.
pub const DEADLINE: ContextKey<Instant> = ContextKey::new("sluice.deadline");

type Entries = HashMap<&'static str, Arc<dyn Any + Send + Sync>>;

/// Typed, cheaply clonable key/value map scoped to one request.
#[derive(Clone, Default)]
pub struct RequestContext {
    entries: Arc<Entries>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, replacing any previous value.
    pub fn insert<T: Send + Sync + 'static>(&mut self, key: ContextKey<T>, value: T) {
        Arc::make_mut(&mut self.entries).insert(key.name, Arc::new(value));
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with<T: Send + Sync + 'static>(mut self, key: ContextKey<T>, value: T) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get<T: Send + Sync + 'static>(&self, key: ContextKey<T>) -> Option<&T> {
        self.entries.get(key.name)?.downcast_ref()
    }

    pub fn remove<T: Send + Sync + 'static>(&mut self, key: ContextKey<T>) -> bool {
        Arc::make_mut(&mut self.entries).remove(key.name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.get(DEADLINE).copied()
    }

    /// Time left until the deadline, zero once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn with_deadline(self, deadline: Instant) -> Self {
        self.with(DEADLINE, deadline)
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.entries.keys().collect();
        keys.sort();
        f.debug_struct("RequestContext")
            .field("keys", &keys)
            .finish()
    }
}

static MISSING_CONTEXT_LOGGED: AtomicBool = AtomicBool::new(false);

/// Publish `now + timeout` as the request deadline.
///
/// Without a context the deadline is not propagated; cancellation on
/// timeout still happens through [`Deadline`](crate::deadline::Deadline).
/// That degradation is logged once per process. A timeout too large to
/// express as an instant stores nothing. Returns whether the deadline was
/// stored.
pub fn propagate_deadline(context: Option<&mut RequestContext>, timeout: Duration) -> bool {
    match context {
        Some(context) => match Instant::now().checked_add(timeout) {
            Some(deadline) => {
                context.insert(DEADLINE, deadline);
                true
            }
            None => {
                debug!(?timeout, "timeout out of range, no deadline propagated");
                false
            }
        },
        None => {
            if !MISSING_CONTEXT_LOGGED.swap(true, Ordering::Relaxed) {
                warn!("request context unavailable, deadlines will not be propagated");
            }
            false
        }
    }
}
