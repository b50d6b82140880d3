//! The fetch boundary.

use crate::model::{FetchRequest, Posts};
use async_trait::async_trait;

/// Source of posts, supplied by the network layer.
///
/// Implementations either return the fetched posts or fail; the sagas turn
/// either outcome into an action. Nothing here enforces that a fetch ever
/// settles.
#[async_trait]
pub trait PostsApi: Send + Sync + 'static {
    async fn fetch_posts(&self, request: FetchRequest) -> anyhow::Result<Posts>;
}
