//! The single source of truth for application state.

use crate::core::Action;
use crate::reducer::Reducer;
use crate::tap::{ActionTap, SharedTap, TapContext, Taps};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use tracing::trace;

type Listener = Arc<dyn Fn() + Send + Sync>;
type Listeners = Mutex<BTreeMap<u64, Listener>>;

/// Owns the application state and applies the root reducer on every dispatch.
///
/// `Store` is a cheap handle: clones share the same state, subscribers and
/// taps. Construct one at process start and pass clones to whoever needs to
/// dispatch or subscribe.
///
/// # Dispatch cycle
///
/// `dispatch` reduces the action, swaps in the new state, notifies
/// subscribers in subscription order and then runs taps. Actions dispatched
/// while a cycle is running (from a listener, a tap, or another thread) are
/// queued and applied FIFO by the thread that owns the cycle before it
/// returns. Every dispatched action reaches the reducer exactly once.
pub struct Store<R: Reducer> {
    inner: Arc<StoreInner<R>>,
}

struct StoreInner<R: Reducer> {
    reducer: R,
    state: RwLock<Arc<R::State>>,
    listeners: Arc<Listeners>,
    next_listener: AtomicU64,
    taps: RwLock<Taps<R::Action>>,
    cycle: Mutex<DispatchCycle<R::Action>>,
    applied: AtomicU64,
}

struct DispatchCycle<A> {
    queue: VecDeque<A>,
    running: bool,
    /// Accepted actions whose taps have not run yet, including the one
    /// being applied.
    unfinished: usize,
}

impl<R: Reducer> Clone for Store<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Reducer> Store<R> {
    pub fn new(reducer: R, initial: R::State) -> Self {
        Self::with_state(reducer, Arc::new(initial))
    }

    pub fn with_state(reducer: R, initial: Arc<R::State>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                reducer,
                state: RwLock::new(initial),
                listeners: Arc::new(Mutex::new(BTreeMap::new())),
                next_listener: AtomicU64::new(0),
                taps: RwLock::new(Taps::new()),
                cycle: Mutex::new(DispatchCycle {
                    queue: VecDeque::new(),
                    running: false,
                    unfinished: 0,
                }),
                applied: AtomicU64::new(0),
            }),
        }
    }

    /// Current state snapshot.
    pub fn state(&self) -> Arc<R::State> {
        Arc::clone(&self.inner.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Number of actions applied so far.
    pub fn applied(&self) -> u64 {
        self.inner.applied.load(Ordering::Acquire)
    }

    /// Actions accepted by [`Store::dispatch`] that have not been fully
    /// applied yet (reduced, listeners notified, taps run).
    ///
    /// Non-zero while a cycle is running, including for actions deferred
    /// behind it by another thread.
    pub fn backlog(&self) -> usize {
        lock(&self.inner.cycle).unfinished
    }

    /// Apply `action` and return it.
    ///
    /// If a dispatch cycle is already running, the action is queued and
    /// applied before that cycle ends; it is returned immediately and is
    /// counted in [`Store::backlog`] until its taps ran.
    pub fn dispatch(&self, action: R::Action) -> R::Action {
        {
            let mut cycle = lock(&self.inner.cycle);
            cycle.queue.push_back(action.clone());
            cycle.unfinished += 1;
            if cycle.running {
                trace!(kind = action.kind(), "dispatch deferred behind running cycle");
                return action;
            }
            cycle.running = true;
        }

        let _reset = CycleReset {
            cycle: &self.inner.cycle,
        };

        loop {
            let next = {
                let mut cycle = lock(&self.inner.cycle);
                match cycle.queue.pop_front() {
                    Some(next) => next,
                    None => {
                        cycle.running = false;
                        break;
                    }
                }
            };
            self.apply(&next);
            let mut cycle = lock(&self.inner.cycle);
            cycle.unfinished = cycle.unfinished.saturating_sub(1);
        }

        action
    }

    fn apply(&self, action: &R::Action) {
        let prev = self.state();
        let next = self.inner.reducer.reduce(&prev, action);
        let state_changed = !Arc::ptr_eq(&prev, &next);
        *self
            .inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner) = next;
        let sequence = self.inner.applied.fetch_add(1, Ordering::AcqRel) + 1;

        trace!(kind = action.kind(), sequence, state_changed, "action applied");

        let listeners: Vec<Listener> = lock(&self.inner.listeners).values().cloned().collect();
        for listener in listeners {
            listener();
        }

        let taps = self
            .inner
            .taps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot();
        let ctx = TapContext {
            sequence,
            state_changed,
        };
        for tap in taps {
            tap.on_action(action, ctx);
        }
    }

    /// Register a listener, called with no arguments after every applied
    /// action. Listeners read the state themselves via [`Store::state`].
    pub fn subscribe<F>(&self, listener: F) -> Unsubscribe
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.listeners).insert(id, Arc::new(listener));
        Unsubscribe {
            id,
            listeners: Arc::downgrade(&self.inner.listeners),
        }
    }

    /// Register an action tap.
    pub fn add_tap<T>(&self, tap: T)
    where
        T: ActionTap<R::Action>,
    {
        self.add_shared_tap(Arc::new(tap));
    }

    pub fn add_shared_tap(&self, tap: SharedTap<R::Action>) {
        self.inner
            .taps
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tap);
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.listeners).len()
    }
}

impl<R: Reducer> fmt::Debug for Store<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("applied", &self.applied())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Handle returned by [`Store::subscribe`].
///
/// Dropping it keeps the subscription; call [`Unsubscribe::unsubscribe`] to
/// remove the listener.
#[must_use = "keep the handle to be able to unsubscribe"]
pub struct Unsubscribe {
    id: u64,
    listeners: Weak<Listeners>,
}

impl Unsubscribe {
    /// Remove the listener. Returns false if the store is gone or the
    /// listener was already removed.
    pub fn unsubscribe(self) -> bool {
        match self.listeners.upgrade() {
            Some(listeners) => lock(&listeners).remove(&self.id).is_some(),
            None => false,
        }
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe").field("id", &self.id).finish()
    }
}

/// Releases the dispatch cycle if a reducer, listener or tap panics, so the
/// panic reaches the caller instead of wedging later dispatches.
struct CycleReset<'a, A> {
    cycle: &'a Mutex<DispatchCycle<A>>,
}

impl<A> Drop for CycleReset<'_, A> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let mut cycle = lock(self.cycle);
            cycle.queue.clear();
            cycle.running = false;
            cycle.unfinished = 0;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
