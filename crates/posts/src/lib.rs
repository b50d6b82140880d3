//! # Posts data layer
//!
//! Views dispatch [`fetch_posts`] and read `state().posts.posts`; the
//! `FETCH_POSTS` watcher does the fetching.
//!
//! ```text
//! view ── dispatch(FETCH_POSTS) ──► Store ──► watch_fetch_posts (take_latest)
//!  ▲                                  │                 │
//!  └──── subscribe / state() ◄────────┘                 ▼
//!                          put(SUCCESS|ERROR) ◄── get_posts_from_api ── PostsApi
//! ```
//!
//! ```ignore
//! let handle = posts_core::start(Arc::new(HttpPostsApi::new(config)?));
//! let _view = handle.store().subscribe(move || render(&store.state().posts.posts));
//! handle.dispatch(fetch_posts(FetchRequest::new()));
//! ```

mod actions;
mod api;
mod model;
mod reducer;
mod sagas;


pub use actions::{
    fetch_posts, fetch_posts_error, fetch_posts_success, PostsAction, FETCH_POSTS,
    FETCH_POSTS_ERROR, FETCH_POSTS_SUCCESS,
};
pub use api::PostsApi;
pub use model::{FetchFailure, FetchRequest, PostRecord, Posts};
pub use reducer::{
    initial_state, root_reducer, AppState, PostsReducer, PostsState, RootReducer, StatusReducer,
    StatusState,
};
pub use sagas::{root_saga, watch_fetch_posts, FetchPostsWorker};

use saga_core::{EngineBuilder, EngineHandle, Store};
use std::sync::Arc;

/// Store with the root reducer and the initial state.
pub fn create_store() -> Store<RootReducer> {
    Store::new(root_reducer(), initial_state())
}

/// Create the store and run the root saga against `api`.
///
/// Must be called from within a tokio runtime.
pub fn start(api: Arc<dyn PostsApi>) -> EngineHandle<RootReducer> {
    EngineBuilder::new(create_store())
        .named("posts")
        .build()
        .start(root_saga(api))
}
