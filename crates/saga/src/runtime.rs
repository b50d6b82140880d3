//! The effect interpreter: a single driver loop that owns every task.
//!
//! Tasks never run concurrently. The loop wakes up for one of three
//! reasons (an external call settled, an action reached the store, or
//! shutdown) and then drains its run queue, driving each ready task through
//! its synchronous segment until the task suspends again.
//!
//! Forwarded actions carry their store sequence. A `take` or watcher only
//! sees actions applied after it registered, so a task never picks up its
//! own earlier `put`.

use crate::core::{Action, TaskId};
use crate::effect::{Effect, TakePolicy, Watch};
use crate::error::{CallError, SagaError};
use crate::reducer::Reducer;
use crate::saga::{AnyValue, BoxedSaga, Resume, Step};
use crate::store::Store;
use crate::tap::{ActionTap, TapContext};
use crate::task::{TaskBody, TaskInfo, TaskRecord, Wait, WatcherState};
use dashmap::DashMap;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

/// Outstanding work the interpreter has not finished yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Activity {
    /// Actions not yet delivered plus calls not yet settled.
    pub(crate) pending: usize,
    pub(crate) stopped: bool,
}

pub(crate) type SharedActivity = Arc<watch::Sender<Activity>>;

/// An applied action and its position in the store's history.
pub(crate) struct Forwarded<A> {
    sequence: u64,
    action: A,
}

/// Store tap that feeds applied actions into the interpreter.
pub(crate) struct ActionForwarder<A> {
    pub(crate) tx: mpsc::UnboundedSender<Forwarded<A>>,
    pub(crate) activity: SharedActivity,
}

impl<A: Action> ActionTap<A> for ActionForwarder<A> {
    fn on_action(&self, action: &A, ctx: TapContext) {
        // Count before sending so the driver can never decrement first.
        self.activity.send_modify(|activity| activity.pending += 1);
        let forwarded = Forwarded {
            sequence: ctx.sequence,
            action: action.clone(),
        };
        if self.tx.send(forwarded).is_err() {
            self.activity
                .send_modify(|activity| activity.pending = activity.pending.saturating_sub(1));
        }
    }
}

struct Completion {
    task: TaskId,
    seq: u64,
    outcome: Result<AnyValue, CallError>,
}

enum Wakeup<A> {
    Settled(Vec<Completion>),
    Action(Forwarded<A>),
    Shutdown,
}

/// Marks the engine stopped however the driver loop ends, including by a
/// panic escaping a reducer or listener during `put`.
struct StopGuard {
    name: String,
    activity: SharedActivity,
    registry: Arc<DashMap<TaskId, TaskInfo>>,
    clean: bool,
}

impl Drop for StopGuard {
    fn drop(&mut self) {
        if !self.clean {
            error!(engine = %self.name, "saga engine crashed");
        }
        self.registry.clear();
        self.activity.send_modify(|activity| activity.stopped = true);
    }
}

#[derive(Debug, Clone, Copy)]
enum Exit {
    Completed,
    Failed,
    Cancelled,
}

pub(crate) struct Interpreter<R: Reducer> {
    store: Store<R>,
    tasks: BTreeMap<TaskId, TaskRecord<R>>,
    run_queue: VecDeque<(TaskId, Resume<R, AnyValue>)>,
    next_task: u64,
    next_seq: u64,
    root: Option<TaskId>,
    actions: mpsc::UnboundedReceiver<Forwarded<R::Action>>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
    activity: SharedActivity,
    registry: Arc<DashMap<TaskId, TaskInfo>>,
    name: String,
}

impl<R: Reducer> Interpreter<R> {
    pub(crate) fn new(
        name: String,
        store: Store<R>,
        actions: mpsc::UnboundedReceiver<Forwarded<R::Action>>,
        activity: SharedActivity,
        registry: Arc<DashMap<TaskId, TaskInfo>>,
    ) -> Self {
        let (completions_tx, completions) = mpsc::unbounded_channel();
        Self {
            store,
            tasks: BTreeMap::new(),
            run_queue: VecDeque::new(),
            next_task: 0,
            next_seq: 0,
            root: None,
            actions,
            completions_tx,
            completions,
            activity,
            registry,
            name,
        }
    }

    /// Spawn `root` and run its first segment on the calling thread, so its
    /// `take`s and watchers are registered before anything else is
    /// dispatched.
    pub(crate) fn start_root(&mut self, root: BoxedSaga<R>) {
        info!(engine = %self.name, root = root.task_name(), "saga engine started");
        let root = self.spawn(None, root);
        self.root = Some(root);
        self.drain();
    }

    /// Interpret effects until shutdown or until every handle is gone.
    pub(crate) async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut stop = StopGuard {
            name: self.name.clone(),
            activity: Arc::clone(&self.activity),
            registry: Arc::clone(&self.registry),
            clean: false,
        };

        loop {
            // Completions first: a call that settled before a newer action
            // arrived resumes before that action can cancel it.
            let wakeup = tokio::select! {
                biased;
                _ = shutdown.changed() => Wakeup::Shutdown,
                Some(first) = self.completions.recv() => {
                    let mut batch = vec![first];
                    while let Ok(next) = self.completions.try_recv() {
                        batch.push(next);
                    }
                    Wakeup::Settled(batch)
                }
                Some(forwarded) = self.actions.recv() => Wakeup::Action(forwarded),
                else => Wakeup::Shutdown,
            };

            match wakeup {
                Wakeup::Shutdown => break,
                Wakeup::Action(Forwarded { sequence, action }) => {
                    self.deliver(&action, sequence);
                    self.drain();
                    self.finish_work(1);
                }
                Wakeup::Settled(mut batch) => {
                    // Calls that settled together resume in suspension order.
                    batch.sort_by_key(|completion| completion.seq);
                    let settled = batch.len();
                    for completion in batch {
                        self.complete(completion);
                    }
                    self.drain();
                    self.finish_work(settled);
                }
            }
        }

        let live = self.tasks.len();
        self.tasks.clear();
        self.run_queue.clear();
        info!(engine = %self.name, live_tasks = live, "saga engine stopped");
        stop.clean = true;
    }

    fn drain(&mut self) {
        while let Some((id, input)) = self.run_queue.pop_front() {
            self.drive(id, input);
        }
    }

    /// Run one task until it suspends or finishes.
    fn drive(&mut self, id: TaskId, mut input: Resume<R, AnyValue>) {
        loop {
            let Some(task) = self.tasks.get_mut(&id) else {
                debug!(task = %id, input = input.describe(), "dropping resumption of ended task");
                return;
            };
            let TaskBody::Saga(saga) = &mut task.body else {
                return;
            };
            task.wait = Wait::Ready;

            let step = match catch_unwind(AssertUnwindSafe(|| saga.resume_any(input))) {
                Ok(step) => step,
                Err(payload) => Step::Done(Err(SagaError::Panicked {
                    saga: task.name.clone(),
                    message: panic_message(payload.as_ref()),
                })),
            };
            let effect = match step {
                Step::Yield(effect) => effect,
                Step::Done(result) => {
                    self.body_finished(id, result);
                    return;
                }
            };

            trace!(task = %id, effect = effect.describe(), "evaluating effect");
            match self.evaluate(id, effect) {
                Some(next) => input = next,
                None => {
                    self.publish(id);
                    return;
                }
            }
        }
    }

    /// Evaluate an effect. Returns the immediate resumption, or `None` if
    /// the task is now suspended.
    fn evaluate(&mut self, id: TaskId, effect: Effect<R, AnyValue>) -> Option<Resume<R, AnyValue>> {
        match effect {
            Effect::Put(action) => {
                self.store.dispatch(action);
                Some(Resume::Dispatched)
            }
            Effect::Select => Some(Resume::State(self.store.state())),
            Effect::Call(future) => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.set_wait(id, Wait::Call { seq });
                self.activity.send_modify(|activity| activity.pending += 1);

                let tx = self.completions_tx.clone();
                tokio::spawn(async move {
                    let outcome = future.await;
                    // A closed channel means the engine stopped; nobody is
                    // left to resume.
                    let _ = tx.send(Completion {
                        task: id,
                        seq,
                        outcome,
                    });
                });
                None
            }
            Effect::Take(pattern) => {
                let since = self.store.applied();
                self.set_wait(id, Wait::Take { pattern, since });
                None
            }
            Effect::Watch(watch) => Some(Resume::Forked(self.spawn_watcher(id, watch))),
            Effect::All(children) => {
                if children.is_empty() {
                    return Some(Resume::Joined);
                }
                let joined: BTreeSet<TaskId> = children
                    .into_iter()
                    .map(|child| self.spawn(Some(id), child))
                    .collect();
                self.set_wait(id, Wait::Join(joined));
                None
            }
        }
    }

    fn deliver(&mut self, action: &R::Action, sequence: u64) {
        let matched: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|task| task.accepts(action, sequence))
            .map(|task| task.id)
            .collect();
        trace!(kind = action.kind(), sequence, takers = matched.len(), "delivering action");

        for id in matched {
            let Some(task) = self.tasks.get_mut(&id) else {
                continue;
            };
            match &mut task.body {
                TaskBody::Saga(_) => {
                    task.wait = Wait::Ready;
                    self.run_queue.push_back((id, Resume::Action(action.clone())));
                }
                TaskBody::Watcher(watcher) => {
                    let factory = Arc::clone(&watcher.watch.factory);
                    let policy = watcher.watch.policy;
                    let superseded = match policy {
                        TakePolicy::Latest => watcher.latest.take(),
                        TakePolicy::Every => None,
                    };

                    if let Some(previous) = superseded.filter(|prev| self.tasks.contains_key(prev)) {
                        debug!(
                            watcher = %id,
                            superseded = %previous,
                            kind = action.kind(),
                            "cancelling superseded worker"
                        );
                        self.remove(previous, Exit::Cancelled);
                    }

                    let worker = self.spawn(Some(id), factory(action.clone()));
                    if policy == TakePolicy::Latest {
                        if let Some(TaskBody::Watcher(watcher)) =
                            self.tasks.get_mut(&id).map(|task| &mut task.body)
                        {
                            watcher.latest = Some(worker);
                        }
                    }
                }
            }
        }
    }

    fn complete(&mut self, completion: Completion) {
        let Completion { task, seq, outcome } = completion;
        let current = matches!(
            self.tasks.get(&task).map(|record| &record.wait),
            Some(Wait::Call { seq: waiting }) if *waiting == seq
        );
        if !current {
            debug!(task = %task, ok = outcome.is_ok(), "discarding call result of cancelled task");
            return;
        }

        let input = match outcome {
            Ok(value) => Resume::Value(value),
            Err(err) => Resume::Failed(err),
        };
        self.set_wait(task, Wait::Ready);
        self.run_queue.push_back((task, input));
    }

    fn spawn(&mut self, parent: Option<TaskId>, saga: BoxedSaga<R>) -> TaskId {
        let id = self.allocate(parent);
        let name = saga.task_name().to_string();
        debug!(task = %id, name = %name, parent = ?parent, "task spawned");
        self.insert(TaskRecord::new(id, name, parent, TaskBody::Saga(saga)));
        self.run_queue.push_back((id, Resume::Start));
        id
    }

    fn spawn_watcher(&mut self, parent: TaskId, watch: Watch<R>) -> TaskId {
        let id = self.allocate(Some(parent));
        let name = match watch.policy {
            TakePolicy::Every => format!("take_every({})", watch.pattern),
            TakePolicy::Latest => format!("take_latest({})", watch.pattern),
        };
        debug!(task = %id, name = %name, parent = %parent, "watcher forked");
        let body = TaskBody::Watcher(WatcherState {
            watch,
            latest: None,
            since: self.store.applied(),
        });
        self.insert(TaskRecord::new(id, name, Some(parent), body));
        id
    }

    fn allocate(&mut self, parent: Option<TaskId>) -> TaskId {
        let id = TaskId(self.next_task);
        self.next_task += 1;
        if let Some(parent) = parent.and_then(|parent| self.tasks.get_mut(&parent)) {
            parent.children.insert(id);
        }
        id
    }

    fn insert(&mut self, record: TaskRecord<R>) {
        self.registry.insert(record.id, record.info());
        self.tasks.insert(record.id, record);
    }

    fn body_finished(&mut self, id: TaskId, result: Result<(), SagaError>) {
        if let Err(err) = result {
            let name = self.tasks.get(&id).map(|task| task.name.clone()).unwrap_or_default();
            warn!(task = %id, name = %name, error = %err, "task failed");
            self.remove(id, Exit::Failed);
            return;
        }

        let Some(task) = self.tasks.get_mut(&id) else {
            return;
        };
        if task.children.is_empty() {
            self.remove(id, Exit::Completed);
        } else {
            task.wait = Wait::Children;
            self.publish(id);
        }
    }

    /// Destroy a task. Its attached children are cancelled; its parent is
    /// told about the exit. Failures never propagate upward.
    fn remove(&mut self, id: TaskId, exit: Exit) {
        let Some(task) = self.tasks.remove(&id) else {
            return;
        };
        self.registry.remove(&id);
        debug!(task = %id, name = %task.name, exit = ?exit, "task ended");
        if self.root == Some(id) {
            info!(engine = %self.name, exit = ?exit, "root saga ended");
        }

        for child in task.children {
            self.remove(child, Exit::Cancelled);
        }
        if let Some(parent) = task.parent {
            self.child_exited(parent, id);
        }
    }

    fn child_exited(&mut self, parent: TaskId, child: TaskId) {
        enum Next {
            Nothing,
            Resume,
            Complete,
        }

        let Some(task) = self.tasks.get_mut(&parent) else {
            return;
        };
        task.children.remove(&child);
        let next = match &mut task.wait {
            Wait::Join(remaining) => {
                if remaining.remove(&child) && remaining.is_empty() {
                    Next::Resume
                } else {
                    Next::Nothing
                }
            }
            Wait::Children if task.children.is_empty() => Next::Complete,
            _ => Next::Nothing,
        };

        match next {
            Next::Nothing => self.publish(parent),
            Next::Resume => {
                task.wait = Wait::Ready;
                self.publish(parent);
                self.run_queue.push_back((parent, Resume::Joined));
            }
            Next::Complete => self.remove(parent, Exit::Completed),
        }
    }

    fn set_wait(&mut self, id: TaskId, wait: Wait) {
        if let Some(task) = self.tasks.get_mut(&id) {
            task.wait = wait;
            self.registry.insert(id, task.info());
        }
    }

    fn publish(&self, id: TaskId) {
        if let Some(task) = self.tasks.get(&id) {
            self.registry.insert(id, task.info());
        }
    }

    fn finish_work(&self, units: usize) {
        self.activity
            .send_modify(|activity| activity.pending = activity.pending.saturating_sub(units));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
