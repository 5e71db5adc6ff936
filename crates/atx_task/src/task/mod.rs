//! Tasks: a unit of background work with exactly-once completion delivery.
//!
//! A [`Task`] wraps a work function and up to four callbacks. Its work runs on
//! whatever [`Executor`] it is submitted to, while its completion callbacks
//! run on the coordinator it was built with.
//!
//! # Lifecycle
//!
//! A task is created [`Pending`], becomes [`Running`] when submitted, and
//! [`Finished`] once the coordinator ran its completion callback and its
//! listeners. It can be submitted only once.
//!
//! # Delivery
//!
//! Exactly one of `on_success`, `on_cancelled` or `on_failure` runs, exactly
//! once, for every task that was submitted or cancelled. Exactly one path
//! posts the completion event:
//!
//! - the worker, if it got to start the work function;
//! - the cancelling thread, if it won the race against the start.
//!
//! When the event runs, the cancellation flag decides: once a task has been
//! cancelled, `on_success` never runs, even if the value was already there.
//!
//! [`Pending`]: Status::Pending
//! [`Running`]: Status::Running
//! [`Finished`]: Status::Finished

// -----------------------------------------------------------------------------
// Modules

mod builder;
mod context;

// -----------------------------------------------------------------------------
// Exports

pub use builder::TaskBuilder;
pub use context::TaskContext;

// -----------------------------------------------------------------------------
// Imports

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;
use core::mem;
use core::panic::AssertUnwindSafe;
use core::time::Duration;
use std::panic;

use atx_os::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use atx_os::sync::{Arc, Condvar, Mutex, PoisonError, lock};
use atx_os::utils::OnceFlag;
use tracing::{debug, trace, warn};

use crate::error::panic_message;
use crate::{BoxError, CoordinatorHandle, Executor, SubmitError, TaskError};
use context::Signal;

type Work<T> = Box<dyn FnOnce(&TaskContext) -> Result<T, BoxError> + Send + 'static>;
type Listener = Box<dyn FnOnce() + Send + 'static>;

// The race between a worker starting the work and `cancel`.
const SCHEDULED: u8 = 0;
const INVOKED: u8 = 1;
const ABANDONED: u8 = 2;

// -----------------------------------------------------------------------------
// TaskId

/// Process-unique identifier of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw value.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Identifies a listener registered with [`Task::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

// -----------------------------------------------------------------------------
// Status

/// Lifecycle state of a [`Task`]. Never goes backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    /// Created, not yet submitted.
    Pending = 0,
    /// Submitted to an executor, completion not delivered yet.
    Running = 1,
    /// The completion callback and the listeners have run.
    Finished = 2,
}

impl Status {
    #[inline]
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Pending,
            1 => Self::Running,
            _ => Self::Finished,
        }
    }
}

// -----------------------------------------------------------------------------
// Inner

pub(super) struct Hooks<T> {
    pre_execute: Option<Box<dyn FnOnce() + Send + 'static>>,
    on_success: Option<Box<dyn FnOnce(&T) + Send + 'static>>,
    on_cancelled: Option<Box<dyn FnOnce(Option<&T>) + Send + 'static>>,
    on_failure: Option<Box<dyn FnOnce(&TaskError) + Send + 'static>>,
}

impl<T> Default for Hooks<T> {
    fn default() -> Self {
        Self {
            pre_execute: None,
            on_success: None,
            on_cancelled: None,
            on_failure: None,
        }
    }
}

enum Outcome<T> {
    Completed(Arc<T>),
    Failed(TaskError),
    Cancelled,
}

struct Listeners {
    next: u64,
    entries: Vec<(ListenerId, Listener)>,
    // Set once the completion event took the entries.
    closed: bool,
}

struct Inner<T> {
    id: TaskId,
    status: AtomicU8,
    stage: AtomicU8,
    signal: Arc<Signal>,
    work: Mutex<Option<Work<T>>>,
    hooks: Mutex<Hooks<T>>,
    outcome: Mutex<Option<Outcome<T>>>,
    settled: Condvar,
    listeners: Mutex<Listeners>,
    delivered: OnceFlag,
    coordinator: CoordinatorHandle,
    executor: Option<Arc<dyn Executor>>,
}

impl<T: Send + Sync + 'static> Inner<T> {
    /// The job handed to the executor.
    fn run(this: Arc<Self>) {
        if this
            .stage
            .compare_exchange(SCHEDULED, INVOKED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            trace!(task = %this.id, "cancelled before start, work skipped");
            return;
        }

        let Some(work) = lock(&this.work).take() else {
            return;
        };

        let ctx = TaskContext::new(this.id, Arc::clone(&this.signal));
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| work(&ctx))) {
            Ok(Ok(value)) => Outcome::Completed(Arc::new(value)),
            Ok(Err(err)) => Outcome::Failed(TaskError::failed(err)),
            Err(payload) => {
                let msg = panic_message(&*payload);
                warn!(task = %this.id, "work function panicked: {msg}");
                Outcome::Failed(TaskError::Panicked(msg))
            }
        };

        this.settle(&outcome);
        Self::post(&this, Some(outcome));
    }

    /// Publishes the work's outcome to `get`, unless a cancel got there first.
    fn settle(&self, outcome: &Outcome<T>) {
        let mut slot = lock(&self.outcome);
        if slot.is_none() {
            *slot = Some(match outcome {
                Outcome::Completed(value) => Outcome::Completed(Arc::clone(value)),
                Outcome::Failed(err) => Outcome::Failed(err.clone()),
                Outcome::Cancelled => Outcome::Cancelled,
            });
        }
        drop(slot);
        self.settled.notify_all();
    }

    /// Sends the completion event. Called once per task.
    fn post(this: &Arc<Self>, outcome: Option<Outcome<T>>) {
        let task = Arc::clone(this);
        if !this.coordinator.post(Box::new(move || task.deliver(outcome))) {
            warn!(task = %this.id, "completion of task lost");
        }
    }

    /// Runs on the coordinator.
    fn deliver(&self, outcome: Option<Outcome<T>>) {
        // Decided under the outcome lock, which `cancel` also holds while it
        // raises the flag.
        let cancelled = {
            let _slot = lock(&self.outcome);
            if !self.delivered.set() {
                return;
            }
            self.signal.is_cancelled()
        };

        let hooks = mem::take(&mut *lock(&self.hooks));

        if cancelled {
            let value = match &outcome {
                Some(Outcome::Completed(value)) => Some(&**value),
                _ => None,
            };
            if let Some(on_cancelled) = hooks.on_cancelled {
                self.guard("on_cancelled", || on_cancelled(value));
            }
            debug!(task = %self.id, with_value = value.is_some(), "task cancellation delivered");
        } else {
            match outcome {
                Some(Outcome::Completed(value)) => {
                    if let Some(on_success) = hooks.on_success {
                        self.guard("on_success", || on_success(&*value));
                    }
                }
                Some(Outcome::Failed(err)) => match hooks.on_failure {
                    Some(on_failure) => self.guard("on_failure", || on_failure(&err)),
                    None => warn!(task = %self.id, "task failed: {err}"),
                },
                Some(Outcome::Cancelled) | None => {
                    if let Some(on_cancelled) = hooks.on_cancelled {
                        self.guard("on_cancelled", || on_cancelled(None));
                    }
                }
            }
        }

        let listeners = {
            let mut listeners = lock(&self.listeners);
            listeners.closed = true;
            mem::take(&mut listeners.entries)
        };
        for (_, listener) in listeners {
            self.guard("listener", listener);
        }

        self.status.store(Status::Finished as u8, Ordering::Release);
    }

    /// Runs a user callback, containing its panic.
    fn guard(&self, what: &str, f: impl FnOnce()) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
            warn!(task = %self.id, "{what} panicked: {}", panic_message(&*payload));
        }
    }
}

// -----------------------------------------------------------------------------
// Task

/// A cloneable handle to a unit of background work.
///
/// Clones share the same state. See the [module documentation](self) for the
/// lifecycle and the delivery guarantees.
///
/// # Examples
///
/// ```
/// use atx_task::{CoordinatorThread, ScalingThreadPool, Task};
/// use std::sync::Arc;
///
/// let coordinator = CoordinatorThread::spawn("coordinator").unwrap();
/// let pool = Arc::new(ScalingThreadPool::builder().max_threads(2).build().unwrap());
///
/// let task = Task::builder(coordinator.handle(), |ctx| {
///     ctx.checkpoint()?;
///     Ok(String::from("done"))
/// })
/// .executor(pool)
/// .on_success(|value: &String| println!("{value}"))
/// .build();
///
/// task.execute().unwrap();
/// assert_eq!(task.get().unwrap(), "done");
/// ```
pub struct Task<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Send + Sync + 'static> Task<T> {
    /// Creates a task without callbacks or default executor.
    pub fn new(
        coordinator: &CoordinatorHandle,
        work: impl FnOnce(&TaskContext) -> Result<T, BoxError> + Send + 'static,
    ) -> Self {
        Self::builder(coordinator, work).build()
    }

    /// Starts building a task whose completion is delivered to `coordinator`.
    pub fn builder(
        coordinator: &CoordinatorHandle,
        work: impl FnOnce(&TaskContext) -> Result<T, BoxError> + Send + 'static,
    ) -> TaskBuilder<T> {
        TaskBuilder::new(coordinator, Box::new(work))
    }

    fn from_parts(
        coordinator: CoordinatorHandle,
        work: Work<T>,
        executor: Option<Arc<dyn Executor>>,
        hooks: Hooks<T>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: TaskId::next(),
                status: AtomicU8::new(Status::Pending as u8),
                stage: AtomicU8::new(SCHEDULED),
                signal: Arc::new(Signal::new()),
                work: Mutex::new(Some(work)),
                hooks: Mutex::new(hooks),
                outcome: Mutex::new(None),
                settled: Condvar::new(),
                listeners: Mutex::new(Listeners {
                    next: 0,
                    entries: Vec::new(),
                    closed: false,
                }),
                delivered: OnceFlag::new(),
                coordinator,
                executor,
            }),
        }
    }

    /// Submits the task to the executor it was built with.
    pub fn execute(&self) -> Result<(), SubmitError> {
        match &self.inner.executor {
            Some(executor) => self.execute_on(&**executor),
            None => Err(SubmitError::NoExecutor(self.inner.id)),
        }
    }

    /// Submits the task to `executor`.
    ///
    /// Runs `on_pre_execute` on the calling thread first. If the executor
    /// rejects the job, the task is cancelled and the rejection returned.
    pub fn execute_on(&self, executor: &dyn Executor) -> Result<(), SubmitError> {
        let inner = &self.inner;
        if let Err(current) = inner.status.compare_exchange(
            Status::Pending as u8,
            Status::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            return Err(match Status::from_u8(current) {
                Status::Running => SubmitError::AlreadyRunning(inner.id),
                _ => SubmitError::AlreadyFinished(inner.id),
            });
        }

        let pre_execute = lock(&inner.hooks).pre_execute.take();
        if let Some(pre_execute) = pre_execute {
            pre_execute();
        }

        let task = Arc::clone(inner);
        match executor.execute(Box::new(move || Inner::run(task))) {
            Ok(()) => {
                debug!(task = %inner.id, "task submitted");
                Ok(())
            }
            Err(err) => {
                warn!(task = %inner.id, "task rejected: {err}");
                self.cancel(false);
                Err(SubmitError::Rejected(err))
            }
        }
    }

    /// Requests cancellation.
    ///
    /// Returns `false` if the task was already cancelled, or if its work had
    /// already completed. Either way the success callback will not run from
    /// now on: the coordinator delivers `on_cancelled` instead.
    ///
    /// If the work has not started it never will, and `on_cancelled`
    /// receives `None`. If it is running, it sees the flag through its
    /// [`TaskContext`], and `may_interrupt` also wakes [`TaskContext::sleep`].
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        let inner = &self.inner;
        let won = {
            let mut slot = lock(&inner.outcome);
            if inner.delivered.is_set() || !inner.signal.cancel() {
                return false;
            }
            if slot.is_none() {
                *slot = Some(Outcome::Cancelled);
                true
            } else {
                false
            }
        };
        inner.settled.notify_all();

        if may_interrupt {
            inner.signal.interrupt();
        }

        if inner
            .stage
            .compare_exchange(SCHEDULED, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            drop(lock(&inner.work).take());
            Inner::post(inner, None);
        }

        debug!(task = %inner.id, interrupt = may_interrupt, "task cancelled");
        won
    }

    /// Blocks until the outcome is known and returns a copy of the value.
    ///
    /// Returns as soon as the work completes, without waiting for the
    /// coordinator, so it may be called from the coordinator thread.
    pub fn get(&self) -> Result<T, TaskError>
    where
        T: Clone,
    {
        let slot = lock(&self.inner.outcome);
        let slot = self
            .inner
            .settled
            .wait_while(slot, |slot| slot.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        self.read(&slot)
    }

    /// Like [`get`](Self::get), giving up after `timeout`.
    ///
    /// A timeout leaves the task untouched.
    pub fn get_timeout(&self, timeout: Duration) -> Result<T, TaskError>
    where
        T: Clone,
    {
        let slot = lock(&self.inner.outcome);
        let (slot, _) = self
            .inner
            .settled
            .wait_timeout_while(slot, timeout, |slot| slot.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            return Err(TaskError::Timeout(timeout));
        }
        self.read(&slot)
    }

    fn read(&self, slot: &Option<Outcome<T>>) -> Result<T, TaskError>
    where
        T: Clone,
    {
        if self.inner.signal.is_cancelled() {
            return Err(TaskError::Cancelled);
        }
        match slot {
            Some(Outcome::Completed(value)) => Ok(T::clone(value)),
            Some(Outcome::Failed(err)) => Err(err.clone()),
            Some(Outcome::Cancelled) | None => Err(TaskError::Cancelled),
        }
    }

    /// Registers `listener`, run on the coordinator after the completion
    /// callback.
    ///
    /// A listener added after the task finished is posted to the coordinator
    /// right away.
    pub fn add_listener(&self, listener: impl FnOnce() + Send + 'static) -> ListenerId {
        let mut listeners = lock(&self.inner.listeners);
        let id = ListenerId(listeners.next);
        listeners.next += 1;

        if listeners.closed {
            drop(listeners);
            let inner = Arc::clone(&self.inner);
            self.inner
                .coordinator
                .post(Box::new(move || inner.guard("listener", listener)));
        } else {
            listeners.entries.push((id, Box::new(listener)));
        }
        id
    }

    /// Unregisters a listener. Returns `false` if it already ran or was
    /// never registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.inner.listeners);
        match listeners.entries.iter().position(|(entry, _)| *entry == id) {
            Some(index) => {
                listeners.entries.remove(index);
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self) -> usize {
        lock(&self.inner.listeners).entries.len()
    }
}

impl<T> Task<T> {
    /// Returns the task's id.
    #[inline]
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Returns the current lifecycle state.
    #[inline]
    pub fn status(&self) -> Status {
        Status::from_u8(self.inner.status.load(Ordering::Acquire))
    }

    /// Returns `true` once cancellation has been requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.signal.is_cancelled()
    }

    /// Returns `true` once [`get`](Self::get) would not block.
    pub fn is_done(&self) -> bool {
        lock(&self.inner.outcome).is_some()
    }

    /// Returns `true` once the status is [`Status::Finished`].
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.status() == Status::Finished
    }
}

impl<T> Clone for Task<T> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// TaskHandle

/// A [`Task`] with its value type erased, as kept by the registries.
pub trait TaskHandle: Send + Sync {
    /// See [`Task::id`].
    fn id(&self) -> TaskId;
    /// See [`Task::status`].
    fn status(&self) -> Status;
    /// See [`Task::is_cancelled`].
    fn is_cancelled(&self) -> bool;
    /// See [`Task::cancel`].
    fn cancel(&self, may_interrupt: bool) -> bool;
    /// See [`Task::add_listener`].
    fn add_listener(&self, listener: Box<dyn FnOnce() + Send + 'static>) -> ListenerId;
    /// See [`Task::remove_listener`].
    fn remove_listener(&self, id: ListenerId) -> bool;
}

impl<T: Send + Sync + 'static> TaskHandle for Task<T> {
    #[inline]
    fn id(&self) -> TaskId {
        Task::id(self)
    }

    #[inline]
    fn status(&self) -> Status {
        Task::status(self)
    }

    #[inline]
    fn is_cancelled(&self) -> bool {
        Task::is_cancelled(self)
    }

    #[inline]
    fn cancel(&self, may_interrupt: bool) -> bool {
        Task::cancel(self, may_interrupt)
    }

    #[inline]
    fn add_listener(&self, listener: Box<dyn FnOnce() + Send + 'static>) -> ListenerId {
        Task::add_listener(self, listener)
    }

    #[inline]
    fn remove_listener(&self, id: ListenerId) -> bool {
        Task::remove_listener(self, id)
    }
}

// -----------------------------------------------------------------------------
// Tests
