//! Fetch sagas: the `FETCH_POSTS` watcher and its worker.

use crate::actions::{fetch_posts_error, fetch_posts_success, PostsAction, FETCH_POSTS};
use crate::api::PostsApi;
use crate::model::{FetchFailure, FetchRequest, Posts};
use crate::reducer::RootReducer;
use saga_core::{
    all, boxed, call, put, take_latest, Action, Resume, Saga, SagaError, Script, Step,
};
use std::sync::Arc;
use tracing::{debug, warn};

const WORKER: &str = "get_posts_from_api";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    Fetching,
    Reporting,
}

/// Worker for one `FETCH_POSTS` intent.
///
/// 1. `call` the API with the intent's request
/// 2. on success `put` `FETCH_POSTS_SUCCESS`
/// 3. on failure `put` `FETCH_POSTS_ERROR`
///
/// No retries: one failed attempt becomes one error action.
pub struct FetchPostsWorker {
    api: Arc<dyn PostsApi>,
    request: FetchRequest,
    stage: Stage,
}

impl FetchPostsWorker {
    pub fn new(api: Arc<dyn PostsApi>, request: FetchRequest) -> Self {
        Self {
            api,
            request,
            stage: Stage::Idle,
        }
    }

    /// Worker for a `FETCH_POSTS` action, using its request.
    ///
    /// The watcher only routes `FETCH_POSTS` here; any other action is
    /// logged and fetched with a default request.
    pub fn for_action(api: Arc<dyn PostsApi>, action: PostsAction) -> Self {
        let request = match action {
            PostsAction::FetchPosts(request) => request,
            other => {
                warn!(kind = other.kind(), "fetch worker started for a non-fetch action");
                FetchRequest::default()
            }
        };
        Self::new(api, request)
    }
}

impl Saga<RootReducer> for FetchPostsWorker {
    type Value = Posts;

    fn name(&self) -> &str {
        WORKER
    }

    fn resume(&mut self, input: Resume<RootReducer, Posts>) -> Step<RootReducer, Posts> {
        match (self.stage, input) {
            (Stage::Idle, Resume::Start) => {
                self.stage = Stage::Fetching;
                let api = Arc::clone(&self.api);
                let request = self.request.clone();
                Step::Yield(call(async move { api.fetch_posts(request).await }))
            }
            (Stage::Fetching, Resume::Value(posts)) => {
                self.stage = Stage::Reporting;
                debug!(count = posts.len(), "posts fetched");
                Step::Yield(put(fetch_posts_success(posts)))
            }
            (Stage::Fetching, Resume::Failed(err)) => {
                self.stage = Stage::Reporting;
                warn!(error = %err, "fetching posts failed");
                Step::Yield(put(fetch_posts_error(FetchFailure::from(&err))))
            }
            (Stage::Reporting, Resume::Dispatched) => Step::done(),
            (_, other) => Step::fail(SagaError::UnexpectedResume {
                saga: WORKER.to_string(),
                input: other.describe(),
            }),
        }
    }
}

/// Long-lived watcher: one worker per `FETCH_POSTS`, latest wins.
pub fn watch_fetch_posts(api: Arc<dyn PostsApi>) -> Script<RootReducer> {
    Script::new(
        "watch_fetch_posts",
        vec![take_latest(FETCH_POSTS, move |action: PostsAction| {
            FetchPostsWorker::for_action(Arc::clone(&api), action)
        })],
    )
}

/// Root saga: registers every watcher of the app.
pub fn root_saga(api: Arc<dyn PostsApi>) -> Script<RootReducer> {
    Script::new("root_saga", vec![all(vec![boxed(watch_fetch_posts(api))])])
}
