//! Engine: wires a [`Store`] to the saga interpreter.
//!
//! This is the primary entry point.
//!
//! ```ignore
//! let store = Store::new(root_reducer(), AppState::default());
//! let handle = EngineBuilder::new(store)
//!     .named("posts")
//!     .build()
//!     .start(root_saga(api));
//!
//! handle.dispatch_and_settle(PostsAction::fetch_posts(request)).await?;
//! ```

use crate::core::TaskId;
use crate::error::SagaError;
use crate::reducer::Reducer;
use crate::runtime::{Activity, ActionForwarder, Interpreter, SharedActivity};
use crate::saga::Saga;
use crate::store::Store;
use crate::tap::{ActionTap, SharedTap};
use crate::task::TaskInfo;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Builder for [`Engine`].
pub struct EngineBuilder<R: Reducer> {
    store: Store<R>,
    taps: Vec<SharedTap<R::Action>>,
    name: String,
}

impl<R: Reducer> EngineBuilder<R> {
    pub fn new(store: Store<R>) -> Self {
        Self {
            store,
            taps: Vec::new(),
            name: "saga".to_string(),
        }
    }

    /// Name used in the engine's log lines.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Register an additional tap on the store. Taps added here run before
    /// the interpreter sees the action.
    pub fn with_tap<T: ActionTap<R::Action>>(mut self, tap: T) -> Self {
        self.taps.push(Arc::new(tap));
        self
    }

    pub fn build(self) -> Engine<R> {
        for tap in self.taps {
            self.store.add_shared_tap(tap);
        }
        Engine {
            store: self.store,
            name: self.name,
        }
    }
}

/// A configured engine, ready to run a root saga.
pub struct Engine<R: Reducer> {
    store: Store<R>,
    name: String,
}

impl<R: Reducer> Engine<R> {
    pub fn store(&self) -> &Store<R> {
        &self.store
    }

    /// Start `root` and spawn the interpreter on the current tokio runtime.
    ///
    /// The root's first segment runs before this returns, so its watchers
    /// see every action dispatched afterwards. The engine runs until
    /// [`EngineHandle::shutdown`] is called or every handle is dropped.
    pub fn start<S: Saga<R>>(self, root: S) -> EngineHandle<R> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (activity_tx, activity_rx) = watch::channel(Activity {
            pending: 0,
            stopped: false,
        });
        let activity: SharedActivity = Arc::new(activity_tx);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let registry = Arc::new(DashMap::new());

        self.store.add_tap(ActionForwarder {
            tx,
            activity: Arc::clone(&activity),
        });

        let mut interpreter = Interpreter::new(
            self.name,
            self.store.clone(),
            rx,
            activity,
            Arc::clone(&registry),
        );
        interpreter.start_root(Box::new(root));
        tokio::spawn(interpreter.run(shutdown_rx));

        EngineHandle {
            store: self.store,
            shutdown: Arc::new(shutdown_tx),
            activity: activity_rx,
            registry,
        }
    }
}

/// Handle to a running engine. Cheap to clone.
pub struct EngineHandle<R: Reducer> {
    store: Store<R>,
    shutdown: Arc<watch::Sender<bool>>,
    activity: watch::Receiver<Activity>,
    registry: Arc<DashMap<TaskId, TaskInfo>>,
}

impl<R: Reducer> Clone for EngineHandle<R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            shutdown: Arc::clone(&self.shutdown),
            activity: self.activity.clone(),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<R: Reducer> EngineHandle<R> {
    pub fn store(&self) -> &Store<R> {
        &self.store
    }

    pub fn state(&self) -> Arc<R::State> {
        self.store.state()
    }

    /// Dispatch through the store. Sagas see the action after the reducer.
    pub fn dispatch(&self, action: R::Action) -> R::Action {
        self.store.dispatch(action)
    }

    /// Wait until every dispatched action reached the interpreter and every
    /// external call settled, including calls of cancelled workers.
    ///
    /// Actions still queued in the store's dispatch cycle count as pending.
    /// Never resolves while a call is stuck; wrap it in a timeout if the
    /// collaborator may hang.
    pub async fn settled(&self) -> Result<(), SagaError> {
        let mut activity = self.activity.clone();
        let store = &self.store;
        let stopped = activity
            .wait_for(|activity| {
                activity.stopped || (activity.pending == 0 && store.backlog() == 0)
            })
            .await
            .map_err(|_| SagaError::EngineStopped)?
            .stopped;
        if stopped {
            Err(SagaError::EngineStopped)
        } else {
            Ok(())
        }
    }

    /// Dispatch and wait for the resulting work to settle.
    pub async fn dispatch_and_settle(&self, action: R::Action) -> Result<R::Action, SagaError> {
        let action = self.dispatch(action);
        self.settled().await?;
        Ok(action)
    }

    /// Snapshot of live tasks, ordered by spawn.
    pub fn tasks(&self) -> Vec<TaskInfo> {
        let mut tasks: Vec<TaskInfo> = self
            .registry
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        tasks.sort_by_key(|task| task.id);
        tasks
    }

    pub fn is_running(&self) -> bool {
        !self.activity.borrow().stopped
    }

    /// Ask the driver loop to stop. In-flight calls keep running; their
    /// results are dropped.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Wait for the driver loop to exit.
    pub async fn stopped(&self) {
        let mut activity = self.activity.clone();
        let _ = activity.wait_for(|activity| activity.stopped).await;
    }
}

impl<R: Reducer> fmt::Debug for EngineHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let activity = *self.activity.borrow();
        f.debug_struct("EngineHandle")
            .field("pending", &activity.pending)
            .field("stopped", &activity.stopped)
            .field("tasks", &self.registry.len())
            .finish()
    }
}
