//! Core vocabulary: actions, patterns and task identity.

use serde::Serialize;
use smallvec::SmallVec;
use std::fmt;

/// Marker trait for actions flowing through the store.
///
/// Actions are facts: immutable, cheap to clone, and tagged with a stable
/// wire-level `kind` string used for pattern matching and external interop.
///
/// Implement this on a closed enum so reducers get exhaustiveness checking:
///
/// ```ignore
/// #[derive(Debug, Clone)]
/// enum CounterAction {
///     Increment,
///     Reset,
/// }
///
/// impl Action for CounterAction {
///     fn kind(&self) -> &'static str {
///         match self {
///             CounterAction::Increment => "INCREMENT",
///             CounterAction::Reset => "RESET",
///         }
///     }
/// }
/// ```
pub trait Action: Clone + fmt::Debug + Send + Sync + 'static {
    /// Wire-level kind of this action.
    fn kind(&self) -> &'static str;
}

/// Selects which actions a `take`, `take_every` or `take_latest` reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// Every action.
    Any,
    /// Actions of exactly one kind.
    Kind(&'static str),
    /// Actions whose kind is one of the listed kinds.
    Kinds(SmallVec<[&'static str; 4]>),
}

impl Pattern {
    pub fn kind(kind: &'static str) -> Self {
        Pattern::Kind(kind)
    }

    pub fn kinds<I>(kinds: I) -> Self
    where
        I: IntoIterator<Item = &'static str>,
    {
        Pattern::Kinds(kinds.into_iter().collect())
    }

    /// Returns true if the action is selected by this pattern.
    pub fn matches<A: Action>(&self, action: &A) -> bool {
        match self {
            Pattern::Any => true,
            Pattern::Kind(kind) => *kind == action.kind(),
            Pattern::Kinds(kinds) => kinds.contains(&action.kind()),
        }
    }
}

impl From<&'static str> for Pattern {
    fn from(kind: &'static str) -> Self {
        Pattern::Kind(kind)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Any => write!(f, "*"),
            Pattern::Kind(kind) => write!(f, "{kind}"),
            Pattern::Kinds(kinds) => write!(f, "[{}]", kinds.join(", ")),
        }
    }
}

/// Identity of a task owned by the saga runtime.
///
/// Ids are allocated in spawn order, so ordering by id is ordering by spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct TaskId(pub(crate) u64);

impl TaskId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}
