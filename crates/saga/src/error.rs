//! Error types for the store and the saga runtime.

use thiserror::Error;

/// Failure of an external call made through a `call` effect.
///
/// Delivered to the calling task as `Resume::Failed`; the task decides
/// whether to recover (usually by dispatching an error action) or terminate.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct CallError(#[from] anyhow::Error);

impl CallError {
    pub fn msg(message: impl Into<String>) -> Self {
        CallError(anyhow::Error::msg(message.into()))
    }

    /// Underlying error.
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }

    pub fn into_inner(self) -> anyhow::Error {
        self.0
    }
}

/// Errors raised by tasks and the runtime.
///
/// None of these escape the interpreter: a task ending with an error is
/// terminated and logged, and its siblings keep running.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A `call` failed and the task chose not to handle it.
    #[error("unhandled call failure in {saga}: {source}")]
    Unhandled {
        saga: String,
        #[source]
        source: CallError,
    },

    /// A task was resumed with an input its current state does not accept.
    #[error("{saga} cannot accept {input} in its current state")]
    UnexpectedResume { saga: String, input: &'static str },

    /// A call resolved to a value of a different type than the task expects.
    #[error("{saga} received a call result of an unexpected type")]
    ValueType { saga: String },

    /// A task body panicked while being resumed. Only that task ends.
    #[error("{saga} panicked: {message}")]
    Panicked { saga: String, message: String },

    /// The runtime's driver loop is no longer running.
    #[error("saga engine has shut down")]
    EngineStopped,
}

impl SagaError {
    pub fn unhandled(saga: impl Into<String>, source: CallError) -> Self {
        SagaError::Unhandled {
            saga: saga.into(),
            source,
        }
    }
}
