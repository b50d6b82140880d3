//! Posts and fetch-status slices, and the root reducer composing them.

use crate::actions::PostsAction;
use crate::model::Posts;
use saga_core::{CombineReducers, Lens, Reducer};
use serde::Serialize;
use std::sync::Arc;

/// The `posts` slice.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PostsState {
    pub posts: Posts,
}

/// Replaces the post list on success; ignores everything else.
pub struct PostsReducer;

impl Reducer for PostsReducer {
    type State = PostsState;
    type Action = PostsAction;

    fn reduce(&self, state: &Arc<PostsState>, action: &PostsAction) -> Arc<PostsState> {
        match action {
            PostsAction::FetchPostsSuccess(posts) => Arc::new(PostsState {
                posts: Arc::clone(posts),
            }),
            PostsAction::FetchPosts(_) | PostsAction::FetchPostsError(_) => Arc::clone(state),
        }
    }
}

/// The `status` slice: whether a fetch is outstanding and the last failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusState {
    pub in_flight: bool,
    pub last_error: Option<String>,
}

pub struct StatusReducer;

impl Reducer for StatusReducer {
    type State = StatusState;
    type Action = PostsAction;

    fn reduce(&self, state: &Arc<StatusState>, action: &PostsAction) -> Arc<StatusState> {
        match action {
            PostsAction::FetchPosts(_) if state.in_flight => Arc::clone(state),
            PostsAction::FetchPosts(_) => Arc::new(StatusState {
                in_flight: true,
                last_error: state.last_error.clone(),
            }),
            PostsAction::FetchPostsSuccess(_) => Arc::new(StatusState {
                in_flight: false,
                last_error: None,
            }),
            PostsAction::FetchPostsError(failure) => Arc::new(StatusState {
                in_flight: false,
                last_error: Some(failure.message.clone()),
            }),
        }
    }
}

/// Root application state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AppState {
    pub posts: Arc<PostsState>,
    pub status: Arc<StatusState>,
}

pub type RootReducer = CombineReducers<AppState, PostsAction>;

pub fn root_reducer() -> RootReducer {
    CombineReducers::new()
        .slice(
            "posts",
            Lens {
                get: |state: &AppState| &state.posts,
                set: |state, posts| state.posts = posts,
            },
            PostsReducer,
        )
        .slice(
            "status",
            Lens {
                get: |state: &AppState| &state.status,
                set: |state, status| state.status = status,
            },
            StatusReducer,
        )
}

/// `{ posts: { posts: [] }, status: { in_flight: false, last_error: null } }`
pub fn initial_state() -> AppState {
    AppState::default()
}
