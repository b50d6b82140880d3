//! # Posts Fetcher Example
//!
//! Wires `posts-core` to a real HTTP API with `reqwest`, renders the first
//! ten titles whenever the post list changes, and fires several fetch
//! intents back-to-back to show that only the latest one lands.
//!
//! Configuration (environment):
//! - `POSTS_API_URL` (default `https://jsonplaceholder.typicode.com/posts`)
//! - `POSTS_API_TIMEOUT_SECS` (default `10`)
//! - `POSTS_FETCH_COUNT` (default `2`)
//! - `RUST_LOG` (default `info`)

use anyhow::{Context, Result};
use async_trait::async_trait;
use posts_core::{fetch_posts, FetchRequest, PostRecord, Posts, PostsApi};
use std::env;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_URL: &str = "https://jsonplaceholder.typicode.com/posts";
const RENDERED_POSTS: usize = 10;

// ============================================================================
// Configuration
// ============================================================================

struct Config {
    url: String,
    timeout: Duration,
    fetch_count: usize,
}

impl Config {
    fn from_env() -> Result<Self> {
        let url = env::var("POSTS_API_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
        let timeout = match env::var("POSTS_API_TIMEOUT_SECS") {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("POSTS_API_TIMEOUT_SECS is not a number: {raw}"))?,
            Err(_) => 10,
        };
        let fetch_count = match env::var("POSTS_FETCH_COUNT") {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("POSTS_FETCH_COUNT is not a number: {raw}"))?,
            Err(_) => 2,
        };
        Ok(Self {
            url,
            timeout: Duration::from_secs(timeout),
            fetch_count,
        })
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();
}

// ============================================================================
// API (uses reqwest directly)
// ============================================================================

struct HttpPostsApi {
    client: reqwest::Client,
    url: String,
}

impl HttpPostsApi {
    fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl PostsApi for HttpPostsApi {
    async fn fetch_posts(&self, request: FetchRequest) -> Result<Posts> {
        let posts: Vec<PostRecord> = self
            .client
            .get(&self.url)
            .query(&request.params)
            .send()
            .await
            .with_context(|| format!("GET {}", self.url))?
            .error_for_status()?
            .json()
            .await
            .context("decoding posts")?;
        Ok(Arc::new(posts))
    }
}

// ============================================================================
// View
// ============================================================================

fn render(posts: &[PostRecord]) {
    if posts.is_empty() {
        println!("(no posts)");
    }
    for (i, post) in posts.iter().take(RENDERED_POSTS).enumerate() {
        println!("Post#{i} - {}", post.title);
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::from_env()?;
    let api = HttpPostsApi::new(&config)?;
    info!(url = %config.url, fetches = config.fetch_count, "starting posts fetcher");

    let handle = posts_core::start(Arc::new(api));

    let store = handle.store().clone();
    let last_rendered: Mutex<Option<Posts>> = Mutex::new(None);
    let _view = handle.store().subscribe(move || {
        let state = store.state();
        let mut last = last_rendered
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let changed = last
            .as_ref()
            .map_or(true, |seen| !Arc::ptr_eq(seen, &state.posts.posts));
        if changed {
            render(&state.posts.posts);
            *last = Some(Arc::clone(&state.posts.posts));
        }
    });

    for page in 0..config.fetch_count {
        handle.dispatch(fetch_posts(
            FetchRequest::new().param("_page", (page + 1).to_string()),
        ));
    }

    handle.settled().await?;

    let state = handle.state();
    if let Some(err) = &state.status.last_error {
        warn!(error = %err, "last fetch failed");
    }
    info!(posts = state.posts.posts.len(), "all fetches settled");

    handle.shutdown();
    handle.stopped().await;
    Ok(())
}
