use alloc::string::String;
use core::time::Duration;

use atx_os::sync::Arc;

use super::ScalingThreadPool;
use crate::PoolError;

/// Idle time after which a worker beyond `min_threads` retires.
const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(10);

/// Per-thread hook, see [`ScalingThreadPoolBuilder::on_thread_spawn`].
pub(super) type ThreadHook = Arc<dyn Fn() + Send + Sync + 'static>;

// -----------------------------------------------------------------------------
// ScalingThreadPoolBuilder

/// Builder for creating a [`ScalingThreadPool`].
///
/// Currently configurable parameters:
///
/// - [`min_threads`]: Workers kept alive even when idle. Default: `1`.
///
/// - [`max_threads`]: Upper bound on live workers. Default: the number of
///   logical cores minus one, at least `1`.
///
/// - [`keep_alive`]: How long a worker beyond `min_threads` may stay idle
///   before it retires. Default: 10 seconds.
///
/// - [`thread_name`]: Thread name prefix. Threads are named
///   `{thread_name} ({id})`. Default: `ScalingPool ({id})`.
///
/// - [`stack_size`]: Stack size for worker threads. Default is system-dependent.
///
/// - [`on_thread_spawn`]: Callback executed once when each worker starts.
///
/// - [`on_thread_destroy`]: Callback executed once when each worker is about to terminate.
///
/// Workers are started lazily: a fresh pool has no threads until work arrives.
///
/// # Examples
///
/// ```
/// use core::time::Duration;
/// use atx_task::ScalingThreadPoolBuilder;
///
/// let pool = ScalingThreadPoolBuilder::new()
///     .min_threads(1)
///     .max_threads(4)
///     .keep_alive(Duration::from_secs(2))
///     .thread_name(String::from("decoder"))
///     .build()
///     .unwrap();
///
/// assert_eq!(pool.max_threads(), 4);
/// assert_eq!(pool.live_threads(), 0);
/// ```
///
/// [`min_threads`]: Self::min_threads
/// [`max_threads`]: Self::max_threads
/// [`keep_alive`]: Self::keep_alive
/// [`thread_name`]: Self::thread_name
/// [`stack_size`]: Self::stack_size
/// [`on_thread_spawn`]: Self::on_thread_spawn
/// [`on_thread_destroy`]: Self::on_thread_destroy
#[must_use]
pub struct ScalingThreadPoolBuilder {
    pub(super) min_threads: usize,
    pub(super) max_threads: usize,
    pub(super) keep_alive: Duration,
    pub(super) stack_size: Option<usize>,
    pub(super) thread_name: Option<String>,
    pub(super) on_thread_spawn: Option<ThreadHook>,
    pub(super) on_thread_destroy: Option<ThreadHook>,
}

impl ScalingThreadPoolBuilder {
    /// Creates a new [`ScalingThreadPoolBuilder`] with the default sizes.
    pub fn new() -> Self {
        let cores = atx_os::thread::available_parallelism().get();
        Self {
            min_threads: 1,
            max_threads: cores.saturating_sub(1).max(1),
            keep_alive: DEFAULT_KEEP_ALIVE,
            stack_size: None,
            thread_name: None,
            on_thread_spawn: None,
            on_thread_destroy: None,
        }
    }

    /// Sets the number of workers kept alive while idle.
    #[inline]
    pub fn min_threads(mut self, min_threads: usize) -> Self {
        self.min_threads = min_threads;
        self
    }

    /// Sets the maximum number of live workers.
    #[inline]
    pub fn max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Sets how long an idle worker beyond `min_threads` waits for work.
    #[inline]
    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Override the stack size of the threads created for the pool.
    #[inline]
    pub fn stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }

    /// Sets the thread name prefix.
    ///
    /// Threads will be named `<thread_name> (<thread_index>)`, e.g., `decoder (2)`.
    #[inline]
    pub fn thread_name(mut self, thread_name: String) -> Self {
        self.thread_name = Some(thread_name);
        self
    }

    /// Sets a callback invoked once per worker when it starts.
    ///
    /// Executed on the worker itself, before it takes its first job.
    #[inline]
    pub fn on_thread_spawn(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_thread_spawn = Some(Arc::new(f));
        self
    }

    /// Sets a callback invoked once per worker when it terminates, either by
    /// keep-alive retirement or by pool shutdown.
    #[inline]
    pub fn on_thread_destroy(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_thread_destroy = Some(Arc::new(f));
        self
    }

    /// Creates a [`ScalingThreadPool`] with the configured options.
    ///
    /// Fails when `max_threads` is zero or `min_threads > max_threads`.
    pub fn build(self) -> Result<ScalingThreadPool, PoolError> {
        if self.max_threads == 0 {
            return Err(PoolError::InvalidConfig("max_threads must be at least 1"));
        }
        if self.min_threads > self.max_threads {
            return Err(PoolError::InvalidConfig(
                "min_threads must not exceed max_threads",
            ));
        }
        Ok(ScalingThreadPool::new_internal(self))
    }
}

impl Default for ScalingThreadPoolBuilder {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::ScalingThreadPoolBuilder;
    use crate::PoolError;

    #[test]
    fn rejects_zero_max() {
        let res = ScalingThreadPoolBuilder::new()
            .min_threads(0)
            .max_threads(0)
            .build();
        assert!(matches!(res, Err(PoolError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_min_above_max() {
        let res = ScalingThreadPoolBuilder::new()
            .min_threads(3)
            .max_threads(2)
            .build();
        assert!(matches!(res, Err(PoolError::InvalidConfig(_))));
    }

    #[test]
    fn defaults_are_sane() {
        let builder = ScalingThreadPoolBuilder::default();
        assert_eq!(builder.min_threads, 1);
        assert!(builder.max_threads >= builder.min_threads);
    }
}
