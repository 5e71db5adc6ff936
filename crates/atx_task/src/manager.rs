use alloc::boxed::Box;
use core::fmt;

use atx_os::sync::{Arc, Mutex, lock};
use atx_utils::hash::HashMap;
use tracing::debug;

use crate::{ScalingThreadPool, SubmitError, Task, TaskHandle, TaskId};

type Registry = Mutex<HashMap<TaskId, Box<dyn TaskHandle>>>;

// -----------------------------------------------------------------------------
// TaskPoolManager

/// A [`ScalingThreadPool`] plus the registry of the tasks submitted through
/// it that have not finished yet.
///
/// Every registered task carries a listener that takes it out of the
/// registry once its completion has been delivered, so [`count`] reflects the
/// work still in flight.
///
/// Registration, submission and [`cancel_all`] are serialized by the registry
/// lock: a task is either cancelled by a concurrent `cancel_all`, or
/// registered after it.
///
/// [`count`]: Self::count
/// [`cancel_all`]: Self::cancel_all
pub struct TaskPoolManager {
    pool: Arc<ScalingThreadPool>,
    registry: Arc<Registry>,
}

impl TaskPoolManager {
    /// Creates a manager submitting to `pool`.
    pub fn new(pool: Arc<ScalingThreadPool>) -> Self {
        Self {
            pool,
            registry: Arc::new(Mutex::new(HashMap::default())),
        }
    }

    /// Registers `task` and submits it to the pool.
    ///
    /// On error the task is left unregistered. A task can only be submitted
    /// once, see [`Task::execute_on`].
    pub fn submit<T: Send + Sync + 'static>(&self, task: &Task<T>) -> Result<(), SubmitError> {
        let id = task.id();
        let mut registry = lock(&self.registry);

        let weak = Arc::downgrade(&self.registry);
        let listener = task.add_listener(move || {
            if let Some(registry) = weak.upgrade() {
                lock(&registry).remove(&id);
            }
        });
        let previous = registry.insert(id, Box::new(task.clone()));

        if let Err(err) = task.execute_on(&*self.pool) {
            match previous {
                Some(previous) => registry.insert(id, previous),
                None => registry.remove(&id),
            };
            task.remove_listener(listener);
            return Err(err);
        }

        debug!(task = %id, in_flight = registry.len(), "task registered");
        Ok(())
    }

    /// Cancels every registered task and empties the registry.
    ///
    /// None of them will deliver a success callback afterwards. Each still
    /// delivers its cancellation callback on the coordinator.
    pub fn cancel_all(&self, interrupt: bool) {
        let mut registry = lock(&self.registry);
        let count = registry.len();
        for (_, task) in registry.drain() {
            task.cancel(interrupt);
        }
        debug!(count, interrupt, "cancelled all registered tasks");
    }

    /// Number of registered tasks.
    #[inline]
    pub fn count(&self) -> usize {
        lock(&self.registry).len()
    }

    /// Returns `true` if `id` is registered.
    #[inline]
    pub fn contains(&self, id: TaskId) -> bool {
        lock(&self.registry).contains_key(&id)
    }

    /// The underlying pool.
    #[inline]
    pub fn pool(&self) -> &Arc<ScalingThreadPool> {
        &self.pool
    }
}

impl fmt::Debug for TaskPoolManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskPoolManager")
            .field("pool", &self.pool)
            .field("count", &self.count())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use core::time::Duration;
    use std::thread;

    use super::TaskPoolManager;
    use crate::test_utils::pump_until;
    use crate::{Coordinator, PoolError, ScalingThreadPool, SubmitError, Task};
    use atx_os::sync::Arc;

    fn manager(max_threads: usize) -> TaskPoolManager {
        let pool = ScalingThreadPool::builder()
            .max_threads(max_threads)
            .build()
            .unwrap();
        TaskPoolManager::new(Arc::new(pool))
    }

    #[test]
    fn finished_tasks_leave_the_registry() {
        let coordinator = Coordinator::new();
        let manager = manager(2);

        let tasks: Vec<_> = (0..4)
            .map(|i| Task::new(&coordinator.handle(), move |_| Ok(i)))
            .collect();
        for task in &tasks {
            manager.submit(task).unwrap();
        }
        assert!(manager.count() <= 4);

        let ticker = coordinator.ticker().unwrap();
        pump_until(&ticker, || manager.count() == 0);
        assert!(tasks.iter().all(Task::is_finished));
    }

    #[test]
    fn cancel_all_empties_and_suppresses_success() {
        let coordinator = Coordinator::new();
        let manager = manager(1);
        let (gate_tx, gate_rx) = async_channel::bounded::<()>(1);

        let succeeded = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let gate = gate_rx.clone();
                let succeeded = Arc::clone(&succeeded);
                Task::builder(&coordinator.handle(), move |_| {
                    gate.recv_blocking().ok();
                    Ok(())
                })
                .on_success(move |_| {
                    succeeded.fetch_add(1, Ordering::Relaxed);
                })
                .build()
            })
            .collect();
        for task in &tasks {
            manager.submit(task).unwrap();
            assert!(manager.contains(task.id()));
        }

        manager.cancel_all(true);
        assert_eq!(manager.count(), 0);
        gate_tx.close();

        let ticker = coordinator.ticker().unwrap();
        pump_until(&ticker, || tasks.iter().all(Task::is_finished));
        assert_eq!(succeeded.load(Ordering::Relaxed), 0);
        assert!(tasks.iter().all(Task::is_cancelled));
    }

    #[test]
    fn rejected_submission_is_rolled_back() {
        let coordinator = Coordinator::new();
        let manager = manager(1);
        manager.pool().shutdown();

        let task = Task::new(&coordinator.handle(), |_| Ok(()));
        assert!(matches!(
            manager.submit(&task),
            Err(SubmitError::Rejected(PoolError::Shutdown))
        ));
        assert_eq!(manager.count(), 0);
    }

    #[test]
    fn second_submission_keeps_first_registration() {
        let coordinator = Coordinator::new();
        let manager = manager(1);
        let (gate_tx, gate_rx) = async_channel::bounded::<()>(1);

        let task = Task::new(&coordinator.handle(), move |_| {
            gate_rx.recv_blocking().ok();
            Ok(())
        });
        manager.submit(&task).unwrap();
        assert!(matches!(
            manager.submit(&task),
            Err(SubmitError::AlreadyRunning(_))
        ));
        assert!(manager.contains(task.id()));

        gate_tx.close();
        let ticker = coordinator.ticker().unwrap();
        pump_until(&ticker, || manager.count() == 0);
    }

    #[test]
    fn submission_from_many_threads() {
        let coordinator = Coordinator::new();
        let manager = manager(4);
        let handle = coordinator.handle();

        let tasks = thread::scope(|scope| {
            let workers: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        let task = Task::new(&handle, |ctx| {
                            ctx.sleep(Duration::from_millis(5))?;
                            Ok(())
                        });
                        manager.submit(&task).unwrap();
                        task
                    })
                })
                .collect();
            workers
                .into_iter()
                .map(|w| w.join().unwrap())
                .collect::<Vec<_>>()
        });

        let ticker = coordinator.ticker().unwrap();
        pump_until(&ticker, || manager.count() == 0);
        assert!(tasks.iter().all(Task::is_finished));
    }
}
