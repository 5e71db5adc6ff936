use core::fmt;
use core::time::Duration;
use std::time::Instant;

use atx_os::sync::atomic::{AtomicBool, Ordering};
use atx_os::sync::{Arc, Condvar, Mutex, PoisonError, lock};

use super::TaskId;
use crate::TaskError;

// -----------------------------------------------------------------------------
// Signal

/// Cancellation state shared between a task and its running work function.
pub(super) struct Signal {
    cancelled: AtomicBool,
    interrupted: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

impl Signal {
    pub(super) const fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
            lock: Mutex::new(()),
            wake: Condvar::new(),
        }
    }

    /// Raises the cancellation flag, returning `false` if it was already up.
    #[inline]
    pub(super) fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::AcqRel)
    }

    #[inline]
    pub(super) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Wakes every [`TaskContext::sleep`] in progress and fails the ones to come.
    pub(super) fn interrupt(&self) {
        let _guard = lock(&self.lock);
        self.interrupted.store(true, Ordering::Release);
        self.wake.notify_all();
    }

    #[inline]
    pub(super) fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }
}

// -----------------------------------------------------------------------------
// TaskContext

/// What a running work function can see of its task.
///
/// There is no way to stop a thread from the outside, so cancellation is
/// cooperative: long computations should poll [`is_cancelled`] or call
/// [`checkpoint`] between steps, and wait with [`sleep`] instead of
/// [`std::thread::sleep`] so that `cancel(true)` can cut the wait short.
///
/// [`is_cancelled`]: Self::is_cancelled
/// [`checkpoint`]: Self::checkpoint
/// [`sleep`]: Self::sleep
pub struct TaskContext {
    id: TaskId,
    signal: Arc<Signal>,
}

impl TaskContext {
    #[inline]
    pub(super) fn new(id: TaskId, signal: Arc<Signal>) -> Self {
        Self { id, signal }
    }

    /// The id of the task being run.
    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Returns `true` once the task has been cancelled.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }

    /// Returns `true` once the task has been cancelled with `may_interrupt`.
    #[inline]
    pub fn is_interrupted(&self) -> bool {
        self.signal.is_interrupted()
    }

    /// Fails with [`TaskError::Cancelled`] once the task has been cancelled.
    ///
    /// Meant to be used with `?` inside the work function.
    #[inline]
    pub fn checkpoint(&self) -> Result<(), TaskError> {
        if self.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleeps for `duration` unless the task gets interrupted first.
    ///
    /// Returns [`TaskError::Cancelled`] immediately if the task is already
    /// interrupted, or as soon as it is.
    pub fn sleep(&self, duration: Duration) -> Result<(), TaskError> {
        let deadline = Instant::now() + duration;
        let mut guard = lock(&self.signal.lock);

        loop {
            if self.signal.is_interrupted() {
                return Err(TaskError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            guard = self
                .signal
                .wake
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use core::time::Duration;
    use std::thread;
    use std::time::Instant;

    use super::{Signal, TaskContext};
    use crate::task::TaskId;
    use atx_os::sync::Arc;

    fn context() -> (Arc<Signal>, TaskContext) {
        let signal = Arc::new(Signal::new());
        let ctx = TaskContext::new(TaskId::next(), Arc::clone(&signal));
        (signal, ctx)
    }

    #[test]
    fn checkpoint_follows_cancel() {
        let (signal, ctx) = context();
        assert!(ctx.checkpoint().is_ok());

        assert!(signal.cancel());
        assert!(!signal.cancel());
        assert!(ctx.checkpoint().unwrap_err().is_cancelled());
        assert!(!ctx.is_interrupted());
    }

    #[test]
    fn sleep_runs_to_deadline() {
        let (_signal, ctx) = context();
        let start = Instant::now();
        assert!(ctx.sleep(Duration::from_millis(20)).is_ok());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn interrupt_cuts_sleep_short() {
        let (signal, ctx) = context();
        let start = Instant::now();

        thread::scope(|scope| {
            scope.spawn(|| {
                thread::sleep(Duration::from_millis(20));
                signal.interrupt();
            });
            assert!(ctx.sleep(Duration::from_secs(30)).unwrap_err().is_cancelled());
        });

        assert!(start.elapsed() < Duration::from_secs(10));
        // Already interrupted: fails without waiting.
        assert!(ctx.sleep(Duration::from_secs(30)).is_err());
    }
}
