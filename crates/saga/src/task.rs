//! Task bookkeeping for the runtime, plus the public introspection view.

use crate::core::{Pattern, TaskId};
use crate::effect::{TakePolicy, Watch};
use crate::reducer::Reducer;
use crate::saga::BoxedSaga;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

/// Snapshot of a live task, as exposed by `EngineHandle::tasks`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: String,
    pub parent: Option<TaskId>,
    pub status: TaskStatus,
    pub spawned_at: DateTime<Utc>,
}

/// Where a live task is suspended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued to run its next synchronous segment.
    Ready,
    /// Awaiting an external call.
    Calling,
    /// Awaiting the next action matching `pattern`.
    Taking { pattern: String },
    /// Awaiting `remaining` children of an `all`.
    Joining { remaining: usize },
    /// Body finished; kept alive by attached children.
    AwaitingChildren,
    /// Watcher waiting for its next matching action.
    Watching { pattern: String, latest: bool },
}

pub(crate) enum TaskBody<R: Reducer> {
    Saga(BoxedSaga<R>),
    Watcher(WatcherState<R>),
}

pub(crate) struct WatcherState<R: Reducer> {
    pub(crate) watch: Watch<R>,
    /// Most recent worker, tracked under `TakePolicy::Latest` only.
    pub(crate) latest: Option<TaskId>,
    /// Store sequence at fork time; earlier actions are not picked up.
    pub(crate) since: u64,
}

#[derive(Debug)]
pub(crate) enum Wait {
    Ready,
    Call { seq: u64 },
    /// Only actions applied after store sequence `since` resume the task.
    Take { pattern: Pattern, since: u64 },
    Join(BTreeSet<TaskId>),
    Children,
    Watching,
}

pub(crate) struct TaskRecord<R: Reducer> {
    pub(crate) id: TaskId,
    pub(crate) name: String,
    pub(crate) parent: Option<TaskId>,
    pub(crate) body: TaskBody<R>,
    pub(crate) wait: Wait,
    pub(crate) children: BTreeSet<TaskId>,
    pub(crate) spawned_at: DateTime<Utc>,
}

impl<R: Reducer> TaskRecord<R> {
    pub(crate) fn new(id: TaskId, name: String, parent: Option<TaskId>, body: TaskBody<R>) -> Self {
        let wait = match &body {
            TaskBody::Saga(_) => Wait::Ready,
            TaskBody::Watcher(_) => Wait::Watching,
        };
        Self {
            id,
            name,
            parent,
            body,
            wait,
            children: BTreeSet::new(),
            spawned_at: Utc::now(),
        }
    }

    /// Whether this task consumes `action`, applied at store sequence
    /// `sequence`, right now.
    pub(crate) fn accepts(&self, action: &R::Action, sequence: u64) -> bool {
        match (&self.body, &self.wait) {
            (TaskBody::Watcher(watcher), _) => {
                watcher.since < sequence && watcher.watch.pattern.matches(action)
            }
            (TaskBody::Saga(_), Wait::Take { pattern, since }) => {
                *since < sequence && pattern.matches(action)
            }
            _ => false,
        }
    }

    pub(crate) fn info(&self) -> TaskInfo {
        let status = match (&self.body, &self.wait) {
            (TaskBody::Watcher(watcher), _) => TaskStatus::Watching {
                pattern: watcher.watch.pattern.to_string(),
                latest: watcher.watch.policy == TakePolicy::Latest,
            },
            (_, Wait::Ready) | (_, Wait::Watching) => TaskStatus::Ready,
            (_, Wait::Call { .. }) => TaskStatus::Calling,
            (_, Wait::Take { pattern, .. }) => TaskStatus::Taking {
                pattern: pattern.to_string(),
            },
            (_, Wait::Join(remaining)) => TaskStatus::Joining {
                remaining: remaining.len(),
            },
            (_, Wait::Children) => TaskStatus::AwaitingChildren,
        };
        TaskInfo {
            id: self.id,
            name: self.name.clone(),
            parent: self.parent,
            status,
            spawned_at: self.spawned_at,
        }
    }
}
