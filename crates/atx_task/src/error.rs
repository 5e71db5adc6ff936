//! Error types of the task subsystem.

use alloc::boxed::Box;
use alloc::string::{String, ToString};
use core::any::Any;
use core::time::Duration;
use std::io;

use atx_os::sync::Arc;
use thiserror::Error;

use crate::TaskId;

/// Boxed error returned by a task's work function.
pub type BoxError = Box<dyn core::error::Error + Send + Sync + 'static>;

// -----------------------------------------------------------------------------
// PoolError

/// Errors reported by a [`ScalingThreadPool`](crate::ScalingThreadPool).
#[derive(Debug, Error)]
pub enum PoolError {
    /// The builder was given sizes that cannot describe a pool.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(&'static str),
    /// The pool no longer accepts work.
    #[error("the thread pool has been shut down")]
    Shutdown,
    /// The operating system refused to start a worker while the pool had none.
    #[error("failed to spawn a worker thread")]
    Spawn(#[source] io::Error),
}

// -----------------------------------------------------------------------------
// SubmitError

/// Misuse of the submission API. These are programmer errors and are never
/// worth retrying.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The task was already handed to an executor.
    #[error("cannot execute {0}: the task is already running")]
    AlreadyRunning(TaskId),
    /// The task already delivered its completion.
    #[error("cannot execute {0}: the task has already been executed (a task can be executed only once)")]
    AlreadyFinished(TaskId),
    /// [`Task::execute`](crate::Task::execute) was called on a task built without an executor.
    #[error("cannot execute {0}: no executor was configured")]
    NoExecutor(TaskId),
    /// The executor refused the job. The task has been cancelled.
    #[error("the executor rejected the task")]
    Rejected(#[from] PoolError),
}

// -----------------------------------------------------------------------------
// TaskError

/// Why [`Task::get`](crate::Task::get) produced no value.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// The task was cancelled before its work completed.
    #[error("the task was cancelled")]
    Cancelled,
    /// The timed wait elapsed. The task itself is unaffected.
    #[error("timed out after {0:?} waiting for the task")]
    Timeout(Duration),
    /// The work function returned an error.
    #[error("the task failed: {0}")]
    Failed(#[source] Arc<dyn core::error::Error + Send + Sync + 'static>),
    /// The work function panicked.
    #[error("the task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Wraps an error returned by a work function.
    #[inline]
    pub fn failed(err: BoxError) -> Self {
        Self::Failed(Arc::from(err))
    }

    /// Returns `true` for [`TaskError::Cancelled`].
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns `true` for [`TaskError::Timeout`].
    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Returns the work function's error if it is of type `E`.
    pub fn downcast_ref<E: core::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            Self::Failed(err) => (**err).downcast_ref::<E>(),
            _ => None,
        }
    }
}

// -----------------------------------------------------------------------------
// panic_message

/// Extracts the message of a caught panic.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        String::from("Box<dyn Any>")
    }
}

// -----------------------------------------------------------------------------
// Tests
