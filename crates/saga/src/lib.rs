//! # Saga
//!
//! A single-store state container with a cooperative effect interpreter:
//! components dispatch actions, pure reducers produce new state, and sagas
//! react to actions by describing the asynchronous work to perform.
//!
//! ## Core Concepts
//!
//! - [`Action`] = Facts (something happened)
//! - [`Reducer`] = Pure state transition `(state, action) -> state`
//! - [`Store`] = Owner of the one application state
//! - [`Saga`] = Resumable task body that yields [`Effect`]s
//!
//! Sagas never touch threads or callbacks: they yield declarative effects
//! (`call`, `put`, `take`, `take_latest`, ...) and the runtime evaluates
//! them and resumes the saga with the outcome.
//!
//! ## Architecture
//!
//! ```text
//! UI
//!  │ dispatch(action)
//!  ▼
//! Store ── reduce ──► new State ──► subscribers (re-render)
//!  │
//!  ▼ ActionTap
//! Interpreter (single driver loop)
//!  │
//!  ├─► watcher take_latest(FETCH) ── cancels previous worker
//!  │        │
//!  │        ▼ spawn
//!  │     worker ── call(fetch) ── suspended ──┐
//!  │                                          │ settles
//!  │     worker ◄──── resume(Value|Failed) ───┘
//!  │        │
//!  └────────┴─► put(result action) ──► Store
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Reducers are pure** - No IO, same input gives the same output
//! 2. **State is replaced, never mutated** - Readers hold `Arc` snapshots
//! 3. **Every dispatched action is reduced** - In dispatch order, exactly once
//! 4. **One driver loop** - No two task steps ever run at the same time
//! 5. **Latest wins** - A superseded worker's late result is dropped
//! 6. **Failures stay local** - A failing task never takes down its siblings
//!
//! ## Guarantees
//!
//! - **FIFO resumption**: calls that settle in the same tick resume in the
//!   order their tasks suspended
//! - **Deferred reentrancy**: dispatching from a listener queues the action
//!   behind the one being applied
//! - **No timeouts**: a call that never settles leaves its task suspended
//! - **Next action only**: `take` and watchers never see actions applied
//!   before they registered, including the task's own earlier `put`s
//! - **Contained panics**: a panicking saga ends only its own task; a reducer
//!   panic during `put` stops the engine and `settled()` reports it
//!
//! ## Example
//!
//! ```ignore
//! use saga_core::{call, put, take_latest, EngineBuilder, Resume, Saga, Script, Step, Store};
//!
//! struct FetchWorker { request: Option<Request>, api: Arc<Api> }
//!
//! impl Saga<AppReducer> for FetchWorker {
//!     type Value = Vec<Item>;
//!
//!     fn resume(&mut self, input: Resume<AppReducer, Vec<Item>>) -> Step<AppReducer, Vec<Item>> {
//!         match input {
//!             Resume::Start => {
//!                 let (api, request) = (self.api.clone(), self.request.take());
//!                 Step::Yield(call(async move { api.fetch(request).await }))
//!             }
//!             Resume::Value(items) => Step::Yield(put(AppAction::Loaded(items))),
//!             Resume::Failed(err) => Step::Yield(put(AppAction::Failed(err.to_string()))),
//!             _ => Step::done(),
//!         }
//!     }
//! }
//!
//! let root = Script::new("root", vec![take_latest("FETCH", move |_| FetchWorker::new(api.clone()))]);
//! let handle = EngineBuilder::new(Store::new(AppReducer, AppState::default()))
//!     .build()
//!     .start(root);
//!
//! handle.dispatch(AppAction::Fetch);
//! ```

// Core modules
mod core;
mod effect;
mod engine;
mod error;
mod reducer;
mod runtime;
mod saga;
mod store;
mod tap;
mod task;


// Re-export core types
pub use crate::core::{Action, Pattern, TaskId};

// Re-export error types
pub use crate::error::{CallError, SagaError};

// Re-export reducer types
pub use reducer::{CombineReducers, Lens, Reducer};

// Re-export store types
pub use store::{Store, Unsubscribe};

// Re-export tap types (action observation)
pub use tap::{ActionTap, SharedTap, TapContext};

// Re-export effect constructors and types
pub use effect::{
    all, call, put, select, take, take_every, take_latest, CallFuture, Effect, TakePolicy, Watch,
    WorkerFactory,
};

// Re-export saga types
pub use saga::{boxed, AnySaga, AnyValue, BoxedSaga, Resume, Saga, Script, Step};

// Re-export task introspection types
pub use task::{TaskInfo, TaskStatus};

// Re-export engine types (primary entry point)
pub use engine::{Engine, EngineBuilder, EngineHandle};
