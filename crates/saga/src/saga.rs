//! Resumable task bodies.
//!
//! A saga is an explicit state machine: the runtime calls [`Saga::resume`]
//! with the outcome of the previous effect, and the saga answers with the
//! next [`Step`]. There are no hidden threads or callbacks in a saga body.

use crate::core::TaskId;
use crate::effect::Effect;
use crate::error::{CallError, SagaError};
use crate::reducer::Reducer;
use futures::FutureExt;
use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;

/// Type-erased call result carried through the runtime.
pub type AnyValue = Box<dyn Any + Send>;

/// Type-erased saga owned by the runtime.
pub type BoxedSaga<R> = Box<dyn AnySaga<R>>;

/// Input a saga is resumed with.
pub enum Resume<R: Reducer, V> {
    /// First resumption of a freshly spawned task.
    Start,
    /// A `call` settled successfully.
    Value(V),
    /// A `call` failed.
    Failed(CallError),
    /// A `take` matched this action.
    Action(R::Action),
    /// Answer to `select`.
    State(Arc<R::State>),
    /// A `put` was applied by the store.
    Dispatched,
    /// A watcher was forked as a child task.
    Forked(TaskId),
    /// Every child of an `all` finished.
    Joined,
}

impl<R: Reducer, V> Resume<R, V> {
    /// Short name used in logs and errors.
    pub fn describe(&self) -> &'static str {
        match self {
            Resume::Start => "start",
            Resume::Value(_) => "call value",
            Resume::Failed(_) => "call failure",
            Resume::Action(_) => "action",
            Resume::State(_) => "state",
            Resume::Dispatched => "dispatched",
            Resume::Forked(_) => "forked",
            Resume::Joined => "joined",
        }
    }
}

impl<R: Reducer> Resume<R, AnyValue> {
    fn downcast<V: 'static>(self) -> Option<Resume<R, V>> {
        Some(match self {
            Resume::Value(value) => Resume::Value(*value.downcast::<V>().ok()?),
            Resume::Start => Resume::Start,
            Resume::Failed(err) => Resume::Failed(err),
            Resume::Action(action) => Resume::Action(action),
            Resume::State(state) => Resume::State(state),
            Resume::Dispatched => Resume::Dispatched,
            Resume::Forked(id) => Resume::Forked(id),
            Resume::Joined => Resume::Joined,
        })
    }
}

/// What a saga wants next.
pub enum Step<R: Reducer, V> {
    /// Evaluate an effect, then resume.
    Yield(Effect<R, V>),
    /// The body finished. An error terminates the task without affecting
    /// siblings or the store.
    Done(Result<(), SagaError>),
}

impl<R: Reducer, V: Send + 'static> Step<R, V> {
    pub fn done() -> Self {
        Step::Done(Ok(()))
    }

    pub fn fail(err: SagaError) -> Self {
        Step::Done(Err(err))
    }

    fn erase(self) -> Step<R, AnyValue> {
        match self {
            Step::Done(result) => Step::Done(result),
            Step::Yield(effect) => Step::Yield(match effect {
                Effect::Call(future) => Effect::Call(
                    future
                        .map(|result| result.map(|value| Box::new(value) as AnyValue))
                        .boxed(),
                ),
                Effect::Put(action) => Effect::Put(action),
                Effect::Select => Effect::Select,
                Effect::Take(pattern) => Effect::Take(pattern),
                Effect::Watch(watch) => Effect::Watch(watch),
                Effect::All(children) => Effect::All(children),
            }),
        }
    }
}

/// A resumable task body.
///
/// `Value` is what this saga's `call` effects resolve to. Sagas that never
/// call use `()`.
pub trait Saga<R: Reducer>: Send + 'static {
    type Value: Send + 'static;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn resume(&mut self, input: Resume<R, Self::Value>) -> Step<R, Self::Value>;
}

/// Object-safe form of [`Saga`] used by the runtime.
pub trait AnySaga<R: Reducer>: Send + 'static {
    fn task_name(&self) -> &str;

    fn resume_any(&mut self, input: Resume<R, AnyValue>) -> Step<R, AnyValue>;
}

impl<R: Reducer, S: Saga<R>> AnySaga<R> for S {
    fn task_name(&self) -> &str {
        Saga::name(self)
    }

    fn resume_any(&mut self, input: Resume<R, AnyValue>) -> Step<R, AnyValue> {
        match input.downcast::<S::Value>() {
            Some(input) => self.resume(input).erase(),
            None => Step::fail(SagaError::ValueType {
                saga: Saga::name(self).to_string(),
            }),
        }
    }
}

/// Box a saga for the runtime.
pub fn boxed<R: Reducer, S: Saga<R>>(saga: S) -> BoxedSaga<R> {
    Box::new(saga)
}

/// Saga that yields a fixed sequence of effects.
///
/// Useful for root sagas and watcher registration, which never branch. A
/// failed `call` inside a script terminates it.
pub struct Script<R: Reducer> {
    name: String,
    effects: VecDeque<Effect<R, ()>>,
}

impl<R: Reducer> Script<R> {
    pub fn new(name: impl Into<String>, effects: Vec<Effect<R, ()>>) -> Self {
        Self {
            name: name.into(),
            effects: effects.into(),
        }
    }
}

impl<R: Reducer> Saga<R> for Script<R> {
    type Value = ();

    fn name(&self) -> &str {
        &self.name
    }

    fn resume(&mut self, input: Resume<R, ()>) -> Step<R, ()> {
        if let Resume::Failed(err) = input {
            return Step::fail(SagaError::unhandled(self.name.clone(), err));
        }
        match self.effects.pop_front() {
            Some(effect) => Step::Yield(effect),
            None => Step::done(),
        }
    }
}
