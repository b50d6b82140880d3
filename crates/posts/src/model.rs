//! Data carried by posts actions.

use saga_core::CallError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One post. Only `title` is interpreted; every other field is carried
/// through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    pub title: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PostRecord {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            extra: Map::new(),
        }
    }
}

/// A fetched sequence of posts. Shared so the reducer can hand the exact
/// payload to the state without copying it.
pub type Posts = Arc<Vec<PostRecord>>;

/// Parameters for one fetch, passed through to the API collaborator as
/// query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

impl FetchRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Description of a failed fetch, as carried by `FETCH_POSTS_ERROR`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchFailure {
    pub message: String,
}

impl FetchFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<&CallError> for FetchFailure {
    fn from(err: &CallError) -> Self {
        // `{:#}` keeps the whole context chain on one line.
        Self::new(format!("{:#}", err.inner()))
    }
}
