//! Interpreter scheduling, cancellation and isolation tests.

use saga_core::{
    all, boxed, call, put, select, take, take_every, take_latest, Action, EngineBuilder,
    EngineHandle, Reducer, Resume, Saga, SagaError, Script, Step, Store, TaskStatus,
};
use saga_testing::{within, DeferredCalls, RecordingTap};
use std::sync::Arc;
use tokio::sync::oneshot;

#[derive(Debug, Clone, PartialEq)]
enum Msg {
    Fetch(u32),
    Loaded(u32, String),
    Failed(u32, String),
    Ping,
    Pong,
    Done,
    Crash,
}

impl Action for Msg {
    fn kind(&self) -> &'static str {
        match self {
            Msg::Fetch(_) => "FETCH",
            Msg::Loaded(..) => "LOADED",
            Msg::Failed(..) => "FAILED",
            Msg::Ping => "PING",
            Msg::Pong => "PONG",
            Msg::Done => "DONE",
            Msg::Crash => "CRASH",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Board {
    loaded: Vec<(u32, String)>,
    errors: Vec<String>,
}

struct BoardReducer;

impl Reducer for BoardReducer {
    type State = Board;
    type Action = Msg;

    fn reduce(&self, state: &Arc<Board>, action: &Msg) -> Arc<Board> {
        match action {
            Msg::Loaded(id, body) => {
                let mut next = Board::clone(state);
                next.loaded.push((*id, body.clone()));
                Arc::new(next)
            }
            Msg::Failed(_, error) => {
                let mut next = Board::clone(state);
                next.errors.push(error.clone());
                Arc::new(next)
            }
            Msg::Crash => panic!("board rejects crash"),
            _ => Arc::clone(state),
        }
    }
}

/// Worker: fetch one id through the deferred collaborator and report.
struct Fetcher {
    id: u32,
    calls: DeferredCalls<u32, String>,
    handle_errors: bool,
}

impl Saga<BoardReducer> for Fetcher {
    type Value = String;

    fn name(&self) -> &str {
        "fetcher"
    }

    fn resume(&mut self, input: Resume<BoardReducer, String>) -> Step<BoardReducer, String> {
        match input {
            Resume::Start => Step::Yield(call(self.calls.call(self.id))),
            Resume::Value(body) => Step::Yield(put(Msg::Loaded(self.id, body))),
            Resume::Failed(err) if self.handle_errors => {
                Step::Yield(put(Msg::Failed(self.id, err.to_string())))
            }
            Resume::Failed(err) => Step::fail(SagaError::unhandled("fetcher", err)),
            Resume::Dispatched => Step::done(),
            other => Step::fail(SagaError::UnexpectedResume {
                saga: "fetcher".to_string(),
                input: other.describe(),
            }),
        }
    }
}

fn fetch_id(action: &Msg) -> u32 {
    match action {
        Msg::Fetch(id) => *id,
        _ => 0,
    }
}

fn latest_root(calls: DeferredCalls<u32, String>, handle_errors: bool) -> Script<BoardReducer> {
    Script::new(
        "root",
        vec![take_latest("FETCH", move |action: Msg| Fetcher {
            id: fetch_id(&action),
            calls: calls.clone(),
            handle_errors,
        })],
    )
}

fn every_root(calls: DeferredCalls<u32, String>) -> Script<BoardReducer> {
    Script::new(
        "root",
        vec![take_every("FETCH", move |action: Msg| Fetcher {
            id: fetch_id(&action),
            calls: calls.clone(),
            handle_errors: true,
        })],
    )
}

fn start<S: Saga<BoardReducer>>(root: S, recorder: &RecordingTap<Msg>) -> EngineHandle<BoardReducer> {
    EngineBuilder::new(Store::new(BoardReducer, Board::default()))
        .named("test")
        .with_tap(recorder.clone())
        .build()
        .start(root)
}

fn loaded(id: u32, body: &str) -> Msg {
    Msg::Loaded(id, body.to_string())
}

#[tokio::test]
async fn take_resumes_with_matching_action_and_put_dispatches() {
    let recorder = RecordingTap::new();
    let handle = start(Script::new("echo", vec![take("PING"), put(Msg::Pong)]), &recorder);
    within(handle.settled()).await.unwrap();

    handle.dispatch(Msg::Pong);
    handle.dispatch(Msg::Ping);
    within(handle.settled()).await.unwrap();

    assert_eq!(recorder.actions(), vec![Msg::Pong, Msg::Ping, Msg::Pong]);
    assert!(handle.tasks().is_empty());
}

/// Waits for a ping, then reports how many loads it saw in the state.
struct Snapshot;

impl Saga<BoardReducer> for Snapshot {
    type Value = ();

    fn resume(&mut self, input: Resume<BoardReducer, ()>) -> Step<BoardReducer, ()> {
        match input {
            Resume::Start => Step::Yield(take("PING")),
            Resume::Action(_) => Step::Yield(select()),
            Resume::State(board) => {
                Step::Yield(put(loaded(board.loaded.len() as u32, "seen")))
            }
            _ => Step::done(),
        }
    }
}

#[tokio::test]
async fn select_reads_the_current_state() {
    let recorder = RecordingTap::new();
    let handle = start(Snapshot, &recorder);

    handle.dispatch(loaded(7, "x"));
    handle.dispatch(Msg::Ping);
    within(handle.settled()).await.unwrap();

    assert_eq!(
        handle.state().loaded,
        vec![(7, "x".to_string()), (1, "seen".to_string())]
    );
}

#[tokio::test]
async fn single_fetch_reaches_the_store() {
    let calls = DeferredCalls::new();
    let recorder = RecordingTap::new();
    let handle = start(latest_root(calls.clone(), true), &recorder);

    handle.dispatch(Msg::Fetch(1));
    within(calls.wait_for_calls(1)).await;
    assert_eq!(calls.requests(), vec![1]);

    calls.resolve(0, "one".to_string());
    within(handle.settled()).await.unwrap();

    assert_eq!(recorder.actions(), vec![Msg::Fetch(1), loaded(1, "one")]);
    assert_eq!(handle.state().loaded, vec![(1, "one".to_string())]);
}

#[tokio::test]
async fn take_latest_drops_result_of_superseded_worker() {
    let calls = DeferredCalls::new();
    let recorder = RecordingTap::new();
    let handle = start(latest_root(calls.clone(), true), &recorder);

    handle.dispatch(Msg::Fetch(1));
    handle.dispatch(Msg::Fetch(2));
    within(calls.wait_for_calls(2)).await;

    // The first call settles last.
    calls.resolve(1, "second".to_string());
    calls.resolve(0, "first".to_string());
    within(handle.settled()).await.unwrap();

    assert_eq!(
        recorder.actions(),
        vec![Msg::Fetch(1), Msg::Fetch(2), loaded(2, "second")]
    );
    assert_eq!(handle.state().loaded, vec![(2, "second".to_string())]);
}

#[tokio::test]
async fn take_latest_drops_superseded_failure_too() {
    let calls = DeferredCalls::new();
    let recorder = RecordingTap::new();
    let handle = start(latest_root(calls.clone(), true), &recorder);

    handle.dispatch(Msg::Fetch(1));
    handle.dispatch(Msg::Fetch(2));
    within(calls.wait_for_calls(2)).await;

    calls.reject(0, "stale failure");
    calls.resolve(1, "fresh".to_string());
    within(handle.settled()).await.unwrap();

    assert_eq!(recorder.count("FAILED"), 0);
    assert_eq!(recorder.count("LOADED"), 1);
    assert!(handle.state().errors.is_empty());
}

#[tokio::test]
async fn take_every_lets_every_worker_finish() {
    let calls = DeferredCalls::new();
    let recorder = RecordingTap::new();
    let handle = start(every_root(calls.clone()), &recorder);

    handle.dispatch(Msg::Fetch(1));
    handle.dispatch(Msg::Fetch(2));
    within(calls.wait_for_calls(2)).await;

    // The first worker is still calling, so wait on its sibling's result
    // rather than on the engine settling.
    calls.resolve(1, "two".to_string());
    within(recorder.wait_for("LOADED", 1)).await;
    assert_eq!(handle.state().loaded, vec![(2, "two".to_string())]);

    calls.resolve(0, "one".to_string());
    within(handle.settled()).await.unwrap();

    assert_eq!(
        handle.state().loaded,
        vec![(2, "two".to_string()), (1, "one".to_string())]
    );
}

#[tokio::test]
async fn calls_settling_together_resume_in_suspension_order() {
    let calls = DeferredCalls::new();
    let recorder = RecordingTap::new();
    let handle = start(every_root(calls.clone()), &recorder);

    handle.dispatch(Msg::Fetch(1));
    handle.dispatch(Msg::Fetch(2));
    within(calls.wait_for_calls(2)).await;

    // Both settle before the driver gets to run again.
    calls.resolve(1, "two".to_string());
    calls.resolve(0, "one".to_string());
    within(handle.settled()).await.unwrap();

    assert_eq!(
        handle.state().loaded,
        vec![(1, "one".to_string()), (2, "two".to_string())]
    );
}

#[tokio::test]
async fn failed_worker_does_not_take_down_the_watcher() {
    let calls = DeferredCalls::new();
    let recorder = RecordingTap::new();
    let handle = start(latest_root(calls.clone(), false), &recorder);

    handle.dispatch(Msg::Fetch(1));
    within(calls.wait_for_calls(1)).await;
    calls.reject(0, "network down");
    within(handle.settled()).await.unwrap();

    // The unhandled failure ended the worker only; nothing reached the store.
    assert_eq!(recorder.actions(), vec![Msg::Fetch(1)]);
    assert!(handle
        .tasks()
        .iter()
        .any(|task| matches!(task.status, TaskStatus::Watching { .. })));

    handle.dispatch(Msg::Fetch(2));
    within(calls.wait_for_calls(2)).await;
    calls.resolve(1, "recovered".to_string());
    within(handle.settled()).await.unwrap();

    assert_eq!(handle.state().loaded, vec![(2, "recovered".to_string())]);
}

#[tokio::test]
async fn all_joins_children_before_resuming_parent() {
    let recorder = RecordingTap::new();
    let root = Script::new(
        "root",
        vec![
            all(vec![
                boxed(Script::new("left", vec![put(loaded(1, "left"))])),
                boxed(Script::new("right", vec![take("PING"), put(Msg::Pong)])),
            ]),
            put(Msg::Done),
        ],
    );
    let handle = start(root, &recorder);
    within(handle.settled()).await.unwrap();

    assert_eq!(recorder.actions(), vec![loaded(1, "left")]);
    let tasks = handle.tasks();
    assert_eq!(tasks[0].name, "root");
    assert_eq!(tasks[0].status, TaskStatus::Joining { remaining: 1 });

    handle.dispatch(Msg::Ping);
    within(handle.settled()).await.unwrap();

    assert_eq!(
        recorder.actions(),
        vec![loaded(1, "left"), Msg::Ping, Msg::Pong, Msg::Done]
    );
    assert!(handle.tasks().is_empty());
}

#[tokio::test]
async fn failed_child_counts_as_finished_for_all() {
    let recorder = RecordingTap::new();
    let root = Script::new(
        "root",
        vec![
            all(vec![boxed(Script::new(
                "broken",
                vec![call(async { Err::<(), _>(anyhow::anyhow!("nope")) })],
            ))]),
            put(Msg::Done),
        ],
    );
    let handle = start(root, &recorder);
    within(handle.settled()).await.unwrap();

    assert_eq!(recorder.actions(), vec![Msg::Done]);
}

#[tokio::test]
async fn tasks_reports_watchers_and_suspended_workers() {
    let calls = DeferredCalls::new();
    let recorder = RecordingTap::new();
    let handle = start(latest_root(calls.clone(), true), &recorder);

    handle.dispatch(Msg::Fetch(1));
    within(calls.wait_for_calls(1)).await;

    let tasks = handle.tasks();
    let statuses: Vec<TaskStatus> = tasks.iter().map(|task| task.status.clone()).collect();
    assert_eq!(
        statuses,
        vec![
            TaskStatus::AwaitingChildren,
            TaskStatus::Watching {
                pattern: "FETCH".to_string(),
                latest: true,
            },
            TaskStatus::Calling,
        ]
    );
    assert_eq!(tasks[2].parent, Some(tasks[1].id));
    assert_eq!(tasks[2].name, "fetcher");

    let json = serde_json::to_value(&tasks[1]).unwrap();
    assert_eq!(json["status"]["state"], "watching");
    assert_eq!(json["name"], "take_latest(FETCH)");

    calls.resolve(0, "one".to_string());
    within(handle.settled()).await.unwrap();
    assert_eq!(handle.tasks().len(), 2);
}

#[tokio::test]
async fn shutdown_stops_the_driver() {
    let calls = DeferredCalls::new();
    let recorder = RecordingTap::new();
    let handle = start(latest_root(calls.clone(), true), &recorder);
    within(handle.settled()).await.unwrap();

    handle.shutdown();
    within(handle.stopped()).await;

    assert!(!handle.is_running());
    assert!(handle.tasks().is_empty());
    assert!(matches!(
        within(handle.settled()).await,
        Err(SagaError::EngineStopped)
    ));

    // The store keeps working on its own.
    handle.dispatch(loaded(3, "offline"));
    assert_eq!(handle.state().loaded.len(), 1);
    assert_eq!(recorder.count("LOADED"), 1);
}

#[tokio::test]
async fn take_only_sees_actions_applied_after_it_suspended() {
    let recorder = RecordingTap::new();
    let handle = start(
        Script::new("self-take", vec![put(Msg::Ping), take("PING"), put(Msg::Done)]),
        &recorder,
    );
    within(handle.settled()).await.unwrap();

    // Its own earlier put does not satisfy the take.
    assert_eq!(recorder.actions(), vec![Msg::Ping]);
    assert_eq!(
        handle.tasks()[0].status,
        TaskStatus::Taking {
            pattern: "PING".to_string()
        }
    );

    handle.dispatch(Msg::Ping);
    within(handle.settled()).await.unwrap();

    assert_eq!(recorder.actions(), vec![Msg::Ping, Msg::Ping, Msg::Done]);
    assert!(handle.tasks().is_empty());
}

#[tokio::test]
async fn watcher_ignores_actions_put_before_it_was_forked() {
    let calls = DeferredCalls::new();
    let recorder = RecordingTap::new();
    let worker_calls = calls.clone();
    let root = Script::new(
        "root",
        vec![all(vec![
            boxed(Script::new("early", vec![put(Msg::Fetch(9))])),
            boxed(Script::new(
                "late",
                vec![take_every("FETCH", move |action: Msg| Fetcher {
                    id: fetch_id(&action),
                    calls: worker_calls.clone(),
                    handle_errors: true,
                })],
            )),
        ])],
    );
    let handle = start(root, &recorder);
    within(handle.settled()).await.unwrap();

    assert!(calls.is_empty());

    handle.dispatch(Msg::Fetch(1));
    within(calls.wait_for_calls(1)).await;
    assert_eq!(calls.requests(), vec![1]);
}

/// Panics as soon as it is resumed with an action.
struct Boom;

impl Saga<BoardReducer> for Boom {
    type Value = ();

    fn name(&self) -> &str {
        "boom"
    }

    fn resume(&mut self, input: Resume<BoardReducer, ()>) -> Step<BoardReducer, ()> {
        match input {
            Resume::Start => Step::Yield(take("PING")),
            _ => panic!("boom on ping"),
        }
    }
}

#[tokio::test]
async fn panicking_saga_ends_only_its_own_task() {
    let recorder = RecordingTap::new();
    let root = Script::new(
        "root",
        vec![all(vec![
            boxed(Boom),
            boxed(Script::new(
                "pong",
                vec![take("PING"), take("PING"), put(Msg::Pong)],
            )),
        ])],
    );
    let handle = start(root, &recorder);

    handle.dispatch(Msg::Ping);
    within(handle.settled()).await.unwrap();

    assert!(handle.is_running());
    let names: Vec<String> = handle.tasks().into_iter().map(|task| task.name).collect();
    assert_eq!(names, vec!["root", "pong"]);

    handle.dispatch(Msg::Ping);
    within(handle.settled()).await.unwrap();

    assert_eq!(recorder.actions(), vec![Msg::Ping, Msg::Ping, Msg::Pong]);
}

#[tokio::test]
async fn reducer_panic_during_put_stops_the_engine() {
    let recorder = RecordingTap::new();
    let handle = start(
        Script::new("crasher", vec![take("PING"), put(Msg::Crash)]),
        &recorder,
    );

    handle.dispatch(Msg::Ping);
    within(handle.stopped()).await;

    assert!(!handle.is_running());
    assert!(handle.tasks().is_empty());
    assert!(matches!(
        within(handle.settled()).await,
        Err(SagaError::EngineStopped)
    ));

    // The store's dispatch cycle was released.
    handle.dispatch(loaded(1, "after"));
    assert_eq!(handle.state().loaded, vec![(1, "after".to_string())]);
}

/// Parks on an action nobody dispatches; reports when the runtime drops it.
struct Parked {
    _released: oneshot::Sender<()>,
}

impl Saga<BoardReducer> for Parked {
    type Value = ();

    fn resume(&mut self, input: Resume<BoardReducer, ()>) -> Step<BoardReducer, ()> {
        match input {
            Resume::Start => Step::Yield(take("DONE")),
            _ => Step::done(),
        }
    }
}

#[tokio::test]
async fn dropping_every_handle_stops_the_driver() {
    let recorder = RecordingTap::new();
    let (released, mut dropped) = oneshot::channel::<()>();
    let handle = start(
        Parked {
            _released: released,
        },
        &recorder,
    );
    let copy = handle.clone();
    let store = handle.store().clone();
    within(handle.settled()).await.unwrap();

    drop(handle);
    tokio::task::yield_now().await;
    assert!(matches!(
        dropped.try_recv(),
        Err(oneshot::error::TryRecvError::Empty)
    ));
    assert!(copy.is_running());

    drop(copy);
    assert!(within(dropped).await.is_err());

    // Nobody is left to take it, and the store still applies it.
    store.dispatch(loaded(5, "late"));
    assert_eq!(store.state().loaded, vec![(5, "late".to_string())]);
}

#[tokio::test]
async fn settled_calls_resume_while_actions_keep_arriving() {
    let recorder = RecordingTap::new();
    let root = Script::new(
        "root",
        vec![
            // Every ping puts another ping: the action queue never empties.
            take_every("PING", |_action: Msg| {
                Script::<BoardReducer>::new("echo", vec![put(Msg::Ping)])
            }),
            call(async {
                tokio::task::yield_now().await;
                Ok::<(), anyhow::Error>(())
            }),
            put(Msg::Done),
        ],
    );
    let handle = start(root, &recorder);

    handle.dispatch(Msg::Ping);
    within(recorder.wait_for("DONE", 1)).await;

    handle.shutdown();
    within(handle.stopped()).await;
    assert_eq!(recorder.count("DONE"), 1);
}
