//! Posts actions and their creators.

use crate::model::{FetchFailure, FetchRequest, PostRecord, Posts};
use saga_core::Action;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const FETCH_POSTS: &str = "FETCH_POSTS";
pub const FETCH_POSTS_SUCCESS: &str = "FETCH_POSTS_SUCCESS";
pub const FETCH_POSTS_ERROR: &str = "FETCH_POSTS_ERROR";

/// Everything that can happen in the posts data layer.
///
/// Serializes as `{"type": <kind>, "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum PostsAction {
    /// Intent: the view wants posts.
    #[serde(rename = "FETCH_POSTS")]
    FetchPosts(FetchRequest),
    /// Fact: posts arrived.
    #[serde(rename = "FETCH_POSTS_SUCCESS")]
    FetchPostsSuccess(Posts),
    /// Fact: the fetch failed.
    #[serde(rename = "FETCH_POSTS_ERROR")]
    FetchPostsError(FetchFailure),
}

impl Action for PostsAction {
    fn kind(&self) -> &'static str {
        match self {
            PostsAction::FetchPosts(_) => FETCH_POSTS,
            PostsAction::FetchPostsSuccess(_) => FETCH_POSTS_SUCCESS,
            PostsAction::FetchPostsError(_) => FETCH_POSTS_ERROR,
        }
    }
}

pub fn fetch_posts(request: FetchRequest) -> PostsAction {
    PostsAction::FetchPosts(request)
}

pub fn fetch_posts_success(posts: Posts) -> PostsAction {
    PostsAction::FetchPostsSuccess(posts)
}

pub fn fetch_posts_error(failure: FetchFailure) -> PostsAction {
    PostsAction::FetchPostsError(failure)
}

impl From<Vec<PostRecord>> for PostsAction {
    fn from(posts: Vec<PostRecord>) -> Self {
        fetch_posts_success(Arc::new(posts))
    }
}
