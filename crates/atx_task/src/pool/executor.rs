//! This module provides the implementation of `ScalingThreadPool`.
//!
//! The pool differs from a fixed-size pool in one decision: where a new job
//! goes when no worker is idle. A fixed pool queues it. This pool starts a new
//! worker instead, up to `max_threads`, and only queues once it cannot grow.
//!
//! The decision is made by the [`ScalingQueue`]: `offer` refuses whenever
//! `active + queued >= live`, and a refusal is what triggers growth. When the
//! pool is already at `max_threads`, the [`ForceQueuePolicy`] puts the job in
//! the queue anyway.
//!
//! Everything that feeds that rule (the queue, the live worker count and the
//! moment a worker turns busy) changes under one lock, so admission, dequeue
//! and idle retirement can never interleave halfway.

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use core::fmt;
use core::mem;
use core::panic::AssertUnwindSafe;
use core::time::Duration;
use std::io;
use std::panic;
use std::thread;
use std::time::Instant;

use atx_os::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use atx_os::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, lock};
use atx_os::thread::JoinHandle;
use atx_os::utils::CachePadded;
use atx_utils::hash::HashMap;
use tracing::{debug, trace, warn};

use super::builder::ThreadHook;
use super::{ForceQueuePolicy, Load, ScalingQueue, ScalingThreadPoolBuilder};
use crate::PoolError;
use crate::error::panic_message;

// -----------------------------------------------------------------------------
// Executor

/// A unit of work accepted by an [`Executor`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Something that runs [`Job`]s.
///
/// This is the seam through which a [`Task`](crate::Task) reaches a pool. An
/// executor may run the job on any thread, at any later time, but it must
/// either accept the job (and eventually run or drop it) or return an error.
pub trait Executor: Send + Sync {
    /// Submits `job` for execution.
    fn execute(&self, job: Job) -> Result<(), PoolError>;
}

// -----------------------------------------------------------------------------
// OnDrop

struct CallOnDrop(Option<ThreadHook>);

impl Drop for CallOnDrop {
    fn drop(&mut self) {
        if let Some(call) = self.0.as_ref() {
            call();
        }
    }
}

// -----------------------------------------------------------------------------
// State

/// Pool state guarded by [`Shared::state`].
struct PoolState {
    queue: ScalingQueue<Job>,
    /// Live workers, busy or idle.
    live: usize,
    /// Highest `live` ever observed.
    largest: usize,
    /// Index of the next worker, used for its name.
    next_index: usize,
    shutdown: bool,
    /// Handles of workers that have not retired.
    threads: HashMap<usize, JoinHandle<()>>,
}

struct Shared {
    state: Mutex<PoolState>,
    /// Signalled when a job is queued or the pool shuts down.
    available: Condvar,
    /// Workers currently inside a job body.
    ///
    /// Raised under the pool lock at the moment a worker dequeues, lowered
    /// right after the body returns.
    active: CachePadded<AtomicUsize>,
    completed: AtomicU64,
    min_threads: usize,
    max_threads: usize,
    keep_alive: Duration,
    stack_size: Option<usize>,
    thread_name: Option<String>,
    on_thread_spawn: Option<ThreadHook>,
    on_thread_destroy: Option<ThreadHook>,
}

impl Shared {
    /// Starts a worker whose first job is already at the head of the queue.
    ///
    /// On failure the job stays queued; the caller decides what to do with it.
    fn spawn_worker(self: &Arc<Self>, state: &mut PoolState) -> io::Result<()> {
        let index = state.next_index;

        let thread_name = if let Some(thread_name) = self.thread_name.as_deref() {
            format!("{thread_name} ({index})")
        } else {
            format!("ScalingPool ({index})")
        };

        let mut thread_builder = thread::Builder::new().name(thread_name);
        if let Some(stack_size) = self.stack_size {
            thread_builder = thread_builder.stack_size(stack_size);
        }

        let shared = Arc::clone(self);
        let handle = thread_builder.spawn(move || shared.run_worker(index))?;

        state.next_index += 1;
        state.threads.insert(index, handle);
        state.live += 1;
        state.largest = state.largest.max(state.live);

        debug!(worker = index, live = state.live, "worker started");
        Ok(())
    }

    /// Hands `job` to a new worker.
    fn grow(self: &Arc<Self>, mut state: MutexGuard<'_, PoolState>, job: Job) -> Result<(), PoolError> {
        state.queue.put_front(job);

        match self.spawn_worker(&mut state) {
            Ok(()) => Ok(()),
            Err(err) if state.live > 0 => {
                // Some worker will reach the job eventually.
                warn!(error = %err, live = state.live, "failed to spawn worker, job queued instead");
                drop(state);
                self.available.notify_one();
                Ok(())
            }
            Err(err) => {
                drop(state.queue.poll());
                Err(PoolError::Spawn(err))
            }
        }
    }

    fn run_worker(self: Arc<Self>, index: usize) {
        if let Some(on_spawn) = self.on_thread_spawn.as_ref() {
            on_spawn();
        }

        // Create a drop guard, call `on_thread_destroy` automatically.
        let _destructor = CallOnDrop(self.on_thread_destroy.clone());

        while let Some(job) = self.next_job(index) {
            let res = panic::catch_unwind(AssertUnwindSafe(job));

            self.active.fetch_sub(1, Ordering::AcqRel);
            self.completed.fetch_add(1, Ordering::Relaxed);

            if let Err(payload) = res {
                warn!(worker = index, panic = %panic_message(&*payload), "job panicked");
            }
        }
    }

    /// Blocks until a job is available, or returns `None` once this worker
    /// should exit.
    ///
    /// A worker beyond `min_threads` retires after `keep_alive` without work,
    /// but only while the queue is empty: whatever was admitted while it still
    /// counted as live gets run.
    fn next_job(&self, index: usize) -> Option<Job> {
        let mut state = lock(&self.state);
        let mut deadline: Option<Instant> = None;

        loop {
            if let Some(job) = state.queue.poll() {
                self.active.fetch_add(1, Ordering::AcqRel);
                return Some(job);
            }

            if state.shutdown {
                state.live -= 1;
                debug!(worker = index, live = state.live, "worker stopped");
                return None;
            }

            if state.live > self.min_threads {
                let now = Instant::now();
                let deadline = *deadline.get_or_insert(now + self.keep_alive);
                if now >= deadline {
                    state.live -= 1;
                    state.threads.remove(&index);
                    debug!(worker = index, live = state.live, "idle worker retired");
                    return None;
                }
                state = self
                    .available
                    .wait_timeout(state, deadline - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            } else {
                deadline = None;
                state = self
                    .available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
    }
}

// -----------------------------------------------------------------------------
// ScalingThreadPool

/// A thread pool that prefers starting workers over queueing.
///
/// - Fewer than `min_threads` workers: a new worker is started for the job.
/// - Otherwise the job is offered to the [`ScalingQueue`], which only takes it
///   if some live worker is idle.
/// - Refused and below `max_threads`: a new worker is started.
/// - Refused at `max_threads`: [`ForceQueuePolicy`] queues it anyway.
///
/// Workers beyond `min_threads` retire after `keep_alive` without work.
///
/// [`active_count`](Self::active_count) counts workers inside a job body,
/// which is not the same as [`live_threads`](Self::live_threads).
///
/// A panicking job is caught at the worker boundary; the worker survives.
///
/// Dropping the pool stops admission, lets queued jobs finish and joins every
/// worker.
///
/// # Examples
///
/// ```
/// use atx_task::{Executor, ScalingThreadPoolBuilder};
///
/// let pool = ScalingThreadPoolBuilder::new()
///     .min_threads(1)
///     .max_threads(2)
///     .build()
///     .unwrap();
///
/// let (tx, rx) = async_channel::unbounded();
/// for i in 0..4 {
///     let tx = tx.clone();
///     pool.execute(Box::new(move || {
///         tx.send_blocking(i).unwrap();
///     }))
///     .unwrap();
/// }
///
/// let mut got: Vec<i32> = (0..4).map(|_| rx.recv_blocking().unwrap()).collect();
/// got.sort();
/// assert_eq!(got, [0, 1, 2, 3]);
/// assert!(pool.live_threads() <= 2);
/// ```
pub struct ScalingThreadPool {
    shared: Arc<Shared>,
}

impl ScalingThreadPool {
    /// Returns a [`ScalingThreadPoolBuilder`].
    #[inline]
    pub fn builder() -> ScalingThreadPoolBuilder {
        ScalingThreadPoolBuilder::new()
    }

    pub(super) fn new_internal(builder: ScalingThreadPoolBuilder) -> Self {
        let state = PoolState {
            queue: ScalingQueue::new(),
            live: 0,
            largest: 0,
            next_index: 0,
            shutdown: false,
            threads: HashMap::default(),
        };

        let shared = Shared {
            state: Mutex::new(state),
            available: Condvar::new(),
            active: CachePadded::new(AtomicUsize::new(0)),
            completed: AtomicU64::new(0),
            min_threads: builder.min_threads,
            max_threads: builder.max_threads,
            keep_alive: builder.keep_alive,
            stack_size: builder.stack_size,
            thread_name: builder.thread_name,
            on_thread_spawn: builder.on_thread_spawn,
            on_thread_destroy: builder.on_thread_destroy,
        };

        Self {
            shared: Arc::new(shared),
        }
    }

    /// Number of workers currently executing a job.
    #[inline]
    pub fn active_count(&self) -> usize {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Number of live worker threads, busy or idle.
    pub fn live_threads(&self) -> usize {
        lock(&self.shared.state).live
    }

    /// Number of jobs waiting in the queue.
    pub fn queued(&self) -> usize {
        lock(&self.shared.state).queue.len()
    }

    /// Highest number of live workers the pool has had at once.
    pub fn largest_pool_size(&self) -> usize {
        lock(&self.shared.state).largest
    }

    /// Number of jobs that have finished running, including panicked ones.
    #[inline]
    pub fn completed_jobs(&self) -> u64 {
        self.shared.completed.load(Ordering::Relaxed)
    }

    /// Workers kept alive while idle.
    #[inline]
    pub fn min_threads(&self) -> usize {
        self.shared.min_threads
    }

    /// Upper bound on live workers.
    #[inline]
    pub fn max_threads(&self) -> usize {
        self.shared.max_threads
    }

    /// Idle time after which a worker beyond `min_threads` retires.
    #[inline]
    pub fn keep_alive(&self) -> Duration {
        self.shared.keep_alive
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) was called.
    pub fn is_shutdown(&self) -> bool {
        lock(&self.shared.state).shutdown
    }

    /// Stops accepting jobs.
    ///
    /// Jobs already queued still run; idle workers exit once the queue is
    /// empty. Does not wait for them, dropping the pool does.
    pub fn shutdown(&self) {
        let mut state = lock(&self.shared.state);
        if state.shutdown {
            return;
        }
        state.shutdown = true;
        debug!(live = state.live, queued = state.queue.len(), "pool shutting down");
        drop(state);
        self.shared.available.notify_all();
    }
}

impl Executor for ScalingThreadPool {
    fn execute(&self, job: Job) -> Result<(), PoolError> {
        let shared = &self.shared;
        let mut state = lock(&shared.state);

        if state.shutdown {
            return Err(PoolError::Shutdown);
        }

        if state.live < shared.min_threads {
            return shared.grow(state, job);
        }

        let load = Load {
            active: shared.active.load(Ordering::Acquire),
            live: state.live,
        };

        match state.queue.offer(job, load) {
            Ok(()) => {
                trace!(active = load.active, live = load.live, "job queued for an idle worker");
                drop(state);
                shared.available.notify_one();
                Ok(())
            }
            Err(job) if state.live < shared.max_threads => shared.grow(state, job),
            Err(job) => {
                ForceQueuePolicy.saturated(job, &mut state.queue);
                drop(state);
                shared.available.notify_one();
                Ok(())
            }
        }
    }
}

impl Drop for ScalingThreadPool {
    fn drop(&mut self) {
        self.shutdown();

        let threads = mem::take(&mut lock(&self.shared.state).threads);
        let current = atx_os::thread::current_id();

        for (index, join_handle) in threads {
            // A job holding the last handle to its own pool cannot join itself.
            if join_handle.thread().id() == current {
                continue;
            }
            if join_handle.join().is_err() {
                warn!(worker = index, "worker panicked outside of a job");
            }
        }
    }
}

impl fmt::Debug for ScalingThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.shared.state);
        f.debug_struct("ScalingThreadPool")
            .field("min_threads", &self.shared.min_threads)
            .field("max_threads", &self.shared.max_threads)
            .field("live", &state.live)
            .field("active", &self.active_count())
            .field("queued", &state.queue.len())
            .field("shutdown", &state.shutdown)
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Tests
