use alloc::boxed::Box;
use core::fmt;

use atx_os::sync::Arc;

use super::{Hooks, Task, Work};
use crate::{CoordinatorHandle, Executor, TaskError};

// -----------------------------------------------------------------------------
// TaskBuilder

/// Builder for a [`Task`], created by [`Task::builder`].
///
/// Every callback is optional:
///
/// - [`on_pre_execute`]: runs on the submitting thread, inside
///   [`Task::execute_on`], before the job reaches the executor.
/// - [`on_success`]: runs on the coordinator with the computed value.
/// - [`on_cancelled`]: runs on the coordinator instead of any other callback
///   once the task has been cancelled. It receives the value only if the work
///   had completed before the cancellation was noticed.
/// - [`on_failure`]: runs on the coordinator when the work returned an error
///   or panicked. Without it, the failure is logged.
///
/// [`on_pre_execute`]: Self::on_pre_execute
/// [`on_success`]: Self::on_success
/// [`on_cancelled`]: Self::on_cancelled
/// [`on_failure`]: Self::on_failure
#[must_use]
pub struct TaskBuilder<T> {
    coordinator: CoordinatorHandle,
    work: Work<T>,
    executor: Option<Arc<dyn Executor>>,
    hooks: Hooks<T>,
}

impl<T: Send + Sync + 'static> TaskBuilder<T> {
    pub(super) fn new(coordinator: &CoordinatorHandle, work: Work<T>) -> Self {
        Self {
            coordinator: coordinator.clone(),
            work,
            executor: None,
            hooks: Hooks::default(),
        }
    }

    /// Sets the executor used by [`Task::execute`].
    #[inline]
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Sets the callback run on the submitting thread before submission.
    #[inline]
    pub fn on_pre_execute(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.hooks.pre_execute = Some(Box::new(f));
        self
    }

    /// Sets the callback run on the coordinator with the computed value.
    #[inline]
    pub fn on_success(mut self, f: impl FnOnce(&T) + Send + 'static) -> Self {
        self.hooks.on_success = Some(Box::new(f));
        self
    }

    /// Sets the callback run on the coordinator once the task is cancelled.
    #[inline]
    pub fn on_cancelled(mut self, f: impl FnOnce(Option<&T>) + Send + 'static) -> Self {
        self.hooks.on_cancelled = Some(Box::new(f));
        self
    }

    /// Sets the callback run on the coordinator when the work fails.
    #[inline]
    pub fn on_failure(mut self, f: impl FnOnce(&TaskError) + Send + 'static) -> Self {
        self.hooks.on_failure = Some(Box::new(f));
        self
    }

    /// Creates the [`Task`], in the [`Pending`](crate::Status::Pending) state.
    pub fn build(self) -> Task<T> {
        Task::from_parts(self.coordinator, self.work, self.executor, self.hooks)
    }
}

impl<T> fmt::Debug for TaskBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskBuilder")
            .field("coordinator", &self.coordinator)
            .field("has_executor", &self.executor.is_some())
            .finish_non_exhaustive()
    }
}
