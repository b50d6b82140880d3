//! Testing utilities for sagas.
//!
//! - [`DeferredCalls`]: an async collaborator whose calls settle only when
//!   the test says so, in whatever order the test chooses.
//! - [`RecordingTap`]: records every action the store applies.
//! - [`within`]: bounds any wait so a broken scenario fails instead of hanging.

use saga_core::{Action, ActionTap, TapContext};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{oneshot, watch};

/// Upper bound used by [`within`].
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

/// Await `future`, panicking if it takes longer than [`DEFAULT_WAIT`].
pub async fn within<F: Future>(future: F) -> F::Output {
    match tokio::time::timeout(DEFAULT_WAIT, future).await {
        Ok(output) => output,
        Err(_) => panic!("timed out after {DEFAULT_WAIT:?}"),
    }
}

struct Slot<Req, T> {
    request: Req,
    reply: Option<oneshot::Sender<anyhow::Result<T>>>,
}

struct Shared<Req, T> {
    slots: Mutex<Vec<Slot<Req, T>>>,
    count: watch::Sender<usize>,
}

/// Externally settled async calls.
///
/// Every [`DeferredCalls::call`] records its request and returns a future
/// that stays pending until the test resolves or rejects that call by
/// index (calls are indexed in the order they were made).
///
/// ```ignore
/// let calls = DeferredCalls::<u32, String>::new();
/// let pending = calls.call(7);
/// calls.resolve(0, "seven".to_string());
/// assert_eq!(pending.await?, "seven");
/// ```
pub struct DeferredCalls<Req, T> {
    shared: Arc<Shared<Req, T>>,
}

impl<Req, T> Clone for DeferredCalls<Req, T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<Req, T> Default for DeferredCalls<Req, T>
where
    Req: Send + 'static,
    T: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<Req, T> DeferredCalls<Req, T>
where
    Req: Send + 'static,
    T: Send + 'static,
{
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                slots: Mutex::new(Vec::new()),
                count,
            }),
        }
    }

    /// Record `request` and return a future settled by the test.
    ///
    /// The request is recorded immediately, not when the future is polled.
    pub fn call(&self, request: Req) -> impl Future<Output = anyhow::Result<T>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        {
            let mut slots = self.slots();
            slots.push(Slot {
                request,
                reply: Some(tx),
            });
            self.shared.count.send_replace(slots.len());
        }
        async move {
            rx.await
                .map_err(|_| anyhow::anyhow!("deferred call dropped without an answer"))?
        }
    }

    /// Number of calls made so far.
    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of calls not settled yet.
    pub fn unsettled(&self) -> usize {
        self.slots().iter().filter(|slot| slot.reply.is_some()).count()
    }

    /// Wait until at least `n` calls were made.
    pub async fn wait_for_calls(&self, n: usize) {
        let mut count = self.shared.count.subscribe();
        // The sender lives in `shared`, so this cannot fail while `self` exists.
        let _ = count.wait_for(|made| *made >= n).await;
    }

    /// Settle call `index` successfully. Returns false if there is no such
    /// call, it was already settled, or its caller went away.
    pub fn resolve(&self, index: usize, value: T) -> bool {
        self.settle(index, Ok(value))
    }

    /// Fail call `index` with `message`.
    pub fn reject(&self, index: usize, message: impl Into<String>) -> bool {
        self.settle(index, Err(anyhow::Error::msg(message.into())))
    }

    fn settle(&self, index: usize, outcome: anyhow::Result<T>) -> bool {
        let reply = self
            .slots()
            .get_mut(index)
            .and_then(|slot| slot.reply.take());
        match reply {
            Some(reply) => reply.send(outcome).is_ok(),
            None => false,
        }
    }

    fn slots(&self) -> MutexGuard<'_, Vec<Slot<Req, T>>> {
        self.shared
            .slots
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<Req, T> DeferredCalls<Req, T>
where
    Req: Clone + Send + 'static,
    T: Send + 'static,
{
    /// Requests in call order.
    pub fn requests(&self) -> Vec<Req> {
        self.slots().iter().map(|slot| slot.request.clone()).collect()
    }
}

/// Tap that records every applied action.
pub struct RecordingTap<A> {
    actions: Arc<Mutex<Vec<A>>>,
    recorded: Arc<watch::Sender<usize>>,
}

impl<A> Clone for RecordingTap<A> {
    fn clone(&self) -> Self {
        Self {
            actions: Arc::clone(&self.actions),
            recorded: Arc::clone(&self.recorded),
        }
    }
}

impl<A: Action> Default for RecordingTap<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Action> RecordingTap<A> {
    pub fn new() -> Self {
        let (recorded, _) = watch::channel(0);
        Self {
            actions: Arc::new(Mutex::new(Vec::new())),
            recorded: Arc::new(recorded),
        }
    }

    /// Wait until at least `n` actions of `kind` were recorded.
    ///
    /// Unlike `EngineHandle::settled`, this does not wait for calls of
    /// superseded workers.
    pub async fn wait_for(&self, kind: &str, n: usize) {
        let mut recorded = self.recorded.subscribe();
        // The sender lives in `self`, so this cannot fail.
        let _ = recorded.wait_for(|_| self.count(kind) >= n).await;
    }

    /// Recorded actions in applied order.
    pub fn actions(&self) -> Vec<A> {
        self.lock().clone()
    }

    /// Kinds of the recorded actions in applied order.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.lock().iter().map(Action::kind).collect()
    }

    /// Number of recorded actions of `kind`.
    pub fn count(&self, kind: &str) -> usize {
        self.lock().iter().filter(|action| action.kind() == kind).count()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<A>> {
        self.actions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<A: Action> ActionTap<A> for RecordingTap<A> {
    fn on_action(&self, action: &A, _ctx: TapContext) {
        let len = {
            let mut actions = self.lock();
            actions.push(action.clone());
            actions.len()
        };
        self.recorded.send_replace(len);
    }
}
