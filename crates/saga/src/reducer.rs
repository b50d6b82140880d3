//! Pure state transitions and root composition.

use crate::core::Action;
use std::sync::Arc;
use tracing::trace;

/// Pure `(state, action) -> state` transition.
///
/// Reducers must be deterministic, perform no IO and be total over every
/// action kind. When an action is irrelevant the reducer returns the same
/// `Arc` it was given, so subscribers can detect "nothing changed" with
/// [`Arc::ptr_eq`].
///
/// A panicking reducer is a programming defect: the store does not catch it.
pub trait Reducer: Send + Sync + 'static {
    type State: Send + Sync + 'static;
    type Action: Action;

    fn reduce(&self, state: &Arc<Self::State>, action: &Self::Action) -> Arc<Self::State>;
}

impl<R: Reducer + ?Sized> Reducer for Arc<R> {
    type State = R::State;
    type Action = R::Action;

    fn reduce(&self, state: &Arc<Self::State>, action: &Self::Action) -> Arc<Self::State> {
        (**self).reduce(state, action)
    }
}

/// Accessors for one slice field of a root state.
pub struct Lens<S, T> {
    pub get: fn(&S) -> &Arc<T>,
    pub set: fn(&mut S, Arc<T>),
}

impl<S, T> Clone for Lens<S, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S, T> Copy for Lens<S, T> {}

/// Object-safe view of one named slice.
trait SliceReducer<S, A>: Send + Sync {
    fn name(&self) -> &'static str;

    /// Reduce this slice of `prev`, writing into `next` only on change.
    fn reduce_into(&self, prev: &S, next: &mut Option<S>, action: &A);
}

struct Slice<S, R: Reducer> {
    name: &'static str,
    lens: Lens<S, R::State>,
    reducer: R,
}

impl<S, R> SliceReducer<S, R::Action> for Slice<S, R>
where
    S: Clone + Send + Sync + 'static,
    R: Reducer,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn reduce_into(&self, prev: &S, next: &mut Option<S>, action: &R::Action) {
        let before = (self.lens.get)(prev);
        let after = self.reducer.reduce(before, action);
        if Arc::ptr_eq(before, &after) {
            return;
        }

        trace!(slice = self.name, kind = action.kind(), "slice changed");
        let target = next.get_or_insert_with(|| prev.clone());
        (self.lens.set)(target, after);
    }
}

/// Root reducer composed from independent, named slice reducers.
///
/// Every slice reducer sees every action and the previous value of its own
/// slice only. Adding a slice never touches existing slice reducers:
///
/// ```ignore
/// let root = CombineReducers::new()
///     .slice("posts", Lens { get: |s: &AppState| &s.posts, set: |s, v| s.posts = v }, PostsReducer)
///     .slice("status", Lens { get: |s: &AppState| &s.status, set: |s, v| s.status = v }, StatusReducer);
/// ```
///
/// The root state is cloned (a shallow clone of slice `Arc`s) only when at
/// least one slice changed; otherwise the incoming `Arc` is returned.
pub struct CombineReducers<S, A> {
    slices: Vec<Box<dyn SliceReducer<S, A>>>,
}

impl<S, A> CombineReducers<S, A>
where
    S: Clone + Send + Sync + 'static,
    A: Action,
{
    pub fn new() -> Self {
        Self { slices: Vec::new() }
    }

    /// Register a slice reducer under `name`.
    pub fn slice<R>(mut self, name: &'static str, lens: Lens<S, R::State>, reducer: R) -> Self
    where
        R: Reducer<Action = A>,
    {
        debug_assert!(
            self.slices.iter().all(|slice| slice.name() != name),
            "duplicate slice name {name}"
        );
        self.slices.push(Box::new(Slice {
            name,
            lens,
            reducer,
        }));
        self
    }

    /// Names of the registered slices, in registration order.
    pub fn slice_names(&self) -> Vec<&'static str> {
        self.slices.iter().map(|slice| slice.name()).collect()
    }
}

impl<S, A> Default for CombineReducers<S, A>
where
    S: Clone + Send + Sync + 'static,
    A: Action,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S, A> Reducer for CombineReducers<S, A>
where
    S: Clone + Send + Sync + 'static,
    A: Action,
{
    type State = S;
    type Action = A;

    fn reduce(&self, state: &Arc<S>, action: &A) -> Arc<S> {
        let mut next = None;
        for slice in &self.slices {
            slice.reduce_into(state, &mut next, action);
        }
        match next {
            Some(changed) => Arc::new(changed),
            None => Arc::clone(state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    enum Op {
        Add(i64),
        Label(&'static str),
        Noop,
    }

    impl Action for Op {
        fn kind(&self) -> &'static str {
            match self {
                Op::Add(_) => "ADD",
                Op::Label(_) => "LABEL",
                Op::Noop => "NOOP",
            }
        }
    }

    struct Sum;

    impl Reducer for Sum {
        type State = i64;
        type Action = Op;

        fn reduce(&self, state: &Arc<i64>, action: &Op) -> Arc<i64> {
            match action {
                Op::Add(n) => Arc::new(**state + n),
                _ => Arc::clone(state),
            }
        }
    }

    struct LabelReducer;

    impl Reducer for LabelReducer {
        type State = String;
        type Action = Op;

        fn reduce(&self, state: &Arc<String>, action: &Op) -> Arc<String> {
            match action {
                Op::Label(label) => Arc::new((*label).to_string()),
                _ => Arc::clone(state),
            }
        }
    }

    #[derive(Debug, Clone)]
    struct Root {
        sum: Arc<i64>,
        label: Arc<String>,
    }

    fn root() -> CombineReducers<Root, Op> {
        CombineReducers::new()
            .slice(
                "sum",
                Lens {
                    get: |s: &Root| &s.sum,
                    set: |s, v| s.sum = v,
                },
                Sum,
            )
            .slice(
                "label",
                Lens {
                    get: |s: &Root| &s.label,
                    set: |s, v| s.label = v,
                },
                LabelReducer,
            )
    }

    fn initial() -> Arc<Root> {
        Arc::new(Root {
            sum: Arc::new(0),
            label: Arc::new(String::new()),
        })
    }

    #[test]
    fn unrelated_action_keeps_root_identity() {
        let state = initial();
        let next = root().reduce(&state, &Op::Noop);
        assert!(Arc::ptr_eq(&state, &next));
    }

    #[test]
    fn only_the_changed_slice_is_replaced() {
        let state = initial();
        let next = root().reduce(&state, &Op::Add(5));

        assert!(!Arc::ptr_eq(&state, &next));
        assert_eq!(*next.sum, 5);
        assert!(Arc::ptr_eq(&state.label, &next.label));
    }

    #[test]
    fn slices_are_listed_in_registration_order() {
        assert_eq!(root().slice_names(), vec!["sum", "label"]);
    }
}
