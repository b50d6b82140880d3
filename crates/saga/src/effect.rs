//! Declarative effect descriptions yielded by sagas.
//!
//! A saga never performs IO itself: it yields an [`Effect`] and the runtime
//! evaluates it, then resumes the saga with the outcome.

use crate::core::Pattern;
use crate::error::CallError;
use crate::reducer::Reducer;
use crate::saga::{BoxedSaga, Saga};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Future evaluated by a `call` effect.
pub type CallFuture<V> = BoxFuture<'static, Result<V, CallError>>;

/// Builds a worker saga for each action a watcher picks up.
pub type WorkerFactory<R> =
    Arc<dyn Fn(<R as Reducer>::Action) -> BoxedSaga<R> + Send + Sync + 'static>;

/// How a watcher treats workers that are still running when a new matching
/// action arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakePolicy {
    /// Spawn a new worker per action; earlier workers run independently.
    Every,
    /// Cancel the previous worker of this watcher before spawning the next.
    Latest,
}

/// Long-lived watcher definition.
pub struct Watch<R: Reducer> {
    pub pattern: Pattern,
    pub policy: TakePolicy,
    pub factory: WorkerFactory<R>,
}

impl<R: Reducer> fmt::Debug for Watch<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watch")
            .field("pattern", &self.pattern)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// A single instruction for the runtime.
pub enum Effect<R: Reducer, V> {
    /// Suspend until the future settles; resume with `Value` or `Failed`.
    Call(CallFuture<V>),
    /// Dispatch through the store; resume with `Dispatched` without suspending.
    Put(R::Action),
    /// Resume immediately with the current state snapshot.
    Select,
    /// Suspend until the next action matching the pattern; resume with it.
    Take(Pattern),
    /// Fork a watcher as a child task; resume with `Forked(child)`.
    Watch(Watch<R>),
    /// Run child sagas concurrently; resume with `Joined` once all finished.
    All(Vec<BoxedSaga<R>>),
}

impl<R: Reducer, V> Effect<R, V> {
    /// Short name used in logs.
    pub fn describe(&self) -> &'static str {
        match self {
            Effect::Call(_) => "call",
            Effect::Put(_) => "put",
            Effect::Select => "select",
            Effect::Take(_) => "take",
            Effect::Watch(Watch {
                policy: TakePolicy::Every,
                ..
            }) => "take_every",
            Effect::Watch(Watch {
                policy: TakePolicy::Latest,
                ..
            }) => "take_latest",
            Effect::All(_) => "all",
        }
    }
}

impl<R: Reducer, V> fmt::Debug for Effect<R, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Put(action) => f.debug_tuple("Put").field(action).finish(),
            Effect::Take(pattern) => f.debug_tuple("Take").field(pattern).finish(),
            Effect::Watch(watch) => f.debug_tuple("Watch").field(watch).finish(),
            Effect::All(children) => f.debug_tuple("All").field(&children.len()).finish(),
            other => f.write_str(other.describe()),
        }
    }
}

/// Await an external asynchronous operation.
///
/// The future keeps running to completion even if the calling task is
/// cancelled; its result is then discarded.
pub fn call<R, V, F, E>(future: F) -> Effect<R, V>
where
    R: Reducer,
    F: Future<Output = Result<V, E>> + Send + 'static,
    E: Into<anyhow::Error>,
{
    Effect::Call(
        future
            .map(|result| result.map_err(|err| CallError::from(err.into())))
            .boxed(),
    )
}

/// Dispatch an action through the store.
pub fn put<R: Reducer, V>(action: R::Action) -> Effect<R, V> {
    Effect::Put(action)
}

/// Read the current state.
pub fn select<R: Reducer, V>() -> Effect<R, V> {
    Effect::Select
}

/// Wait for the next matching action.
pub fn take<R: Reducer, V>(pattern: impl Into<Pattern>) -> Effect<R, V> {
    Effect::Take(pattern.into())
}

/// Spawn a worker for every matching action.
pub fn take_every<R, V, S, F>(pattern: impl Into<Pattern>, factory: F) -> Effect<R, V>
where
    R: Reducer,
    S: Saga<R>,
    F: Fn(R::Action) -> S + Send + Sync + 'static,
{
    watch(pattern.into(), TakePolicy::Every, factory)
}

/// Spawn a worker for every matching action, cancelling the previous one.
pub fn take_latest<R, V, S, F>(pattern: impl Into<Pattern>, factory: F) -> Effect<R, V>
where
    R: Reducer,
    S: Saga<R>,
    F: Fn(R::Action) -> S + Send + Sync + 'static,
{
    watch(pattern.into(), TakePolicy::Latest, factory)
}

/// Run sagas concurrently and wait for all of them.
pub fn all<R: Reducer, V>(sagas: Vec<BoxedSaga<R>>) -> Effect<R, V> {
    Effect::All(sagas)
}

fn watch<R, V, S, F>(pattern: Pattern, policy: TakePolicy, factory: F) -> Effect<R, V>
where
    R: Reducer,
    S: Saga<R>,
    F: Fn(R::Action) -> S + Send + Sync + 'static,
{
    Effect::Watch(Watch {
        pattern,
        policy,
        factory: Arc::new(move |action| Box::new(factory(action)) as BoxedSaga<R>),
    })
}
