//! Action taps: observers that see every action after it was reduced.
//!
//! Taps are how the saga runtime learns about dispatched actions, and how
//! tests record the exact action stream reaching the store. They run after
//! the reducer and after subscriber notification, in registration order.

use std::fmt;
use std::sync::Arc;

/// Metadata about the dispatch a tap is observing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapContext {
    /// 1-based position of the action in the store's applied history.
    pub sequence: u64,
    /// Whether the root reducer produced a new state for this action.
    pub state_changed: bool,
}

/// Observer of applied actions.
///
/// Taps must not block: they run inline in the dispatch cycle. Dispatching
/// from a tap is allowed and is queued behind the current action.
pub trait ActionTap<A>: Send + Sync + 'static {
    fn on_action(&self, action: &A, ctx: TapContext);
}

impl<A, F> ActionTap<A> for F
where
    F: Fn(&A, TapContext) + Send + Sync + 'static,
{
    fn on_action(&self, action: &A, ctx: TapContext) {
        self(action, ctx)
    }
}

/// Shared, type-erased tap.
pub type SharedTap<A> = Arc<dyn ActionTap<A>>;

pub(crate) struct Taps<A> {
    taps: Vec<SharedTap<A>>,
}

impl<A> Taps<A> {
    pub(crate) fn new() -> Self {
        Self { taps: Vec::new() }
    }

    pub(crate) fn push(&mut self, tap: SharedTap<A>) {
        self.taps.push(tap);
    }

    pub(crate) fn snapshot(&self) -> Vec<SharedTap<A>> {
        self.taps.clone()
    }
}

impl<A> fmt::Debug for Taps<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Taps").field("len", &self.taps.len()).finish()
    }
}
