//! Keyed task binding.
//!
//! A list row, a tile or any other slot of a screen often starts background
//! work (decoding an icon, counting items) that becomes useless as soon as the
//! slot is reused for something else. [`ViewTaskBinder`] keeps at most one task
//! per key and cancels the previous one when a key is rebound.

use alloc::boxed::Box;
use core::fmt;
use core::hash::Hash;

use atx_os::sync::{Arc, Mutex, lock};
use atx_utils::hash::HashMap;
use tracing::debug;

use crate::{SubmitError, Task, TaskHandle, TaskPoolManager};

type Bindings<K> = Mutex<HashMap<K, Box<dyn TaskHandle>>>;

// -----------------------------------------------------------------------------
// ViewTaskBinder

/// Associates at most one task with each key.
///
/// - [`bind`] cancels the task previously bound to the key before installing
///   the new one.
/// - A bound task removes its own entry once its completion was delivered, if
///   it still owns the key.
/// - [`cancel_all`], [`dispose`] and dropping the binder cancel every bound
///   task, and the registry of the pool manager if there is one.
///
/// The map is guarded by a lock, so binding and cancelling may happen from
/// any thread.
///
/// # Examples
///
/// ```
/// use atx_task::{Coordinator, Task, ViewTaskBinder};
///
/// let coordinator = Coordinator::new();
/// let binder = ViewTaskBinder::new();
///
/// let old = binder.bind("row-1", Task::new(&coordinator.handle(), |_| Ok(1)));
/// let new = binder.bind("row-1", Task::new(&coordinator.handle(), |_| Ok(2)));
///
/// assert!(old.is_cancelled());
/// assert!(!new.is_cancelled());
/// assert_eq!(binder.len(), 1);
/// ```
///
/// [`bind`]: Self::bind
/// [`cancel_all`]: Self::cancel_all
/// [`dispose`]: Self::dispose
pub struct ViewTaskBinder<K> {
    bindings: Arc<Bindings<K>>,
    manager: Option<Arc<TaskPoolManager>>,
    interrupt_on_cancel: bool,
}

impl<K: Eq + Hash + Clone + Send + 'static> ViewTaskBinder<K> {
    /// Creates a binder without pool manager.
    ///
    /// [`bind_and_submit`](Self::bind_and_submit) then relies on the
    /// executor each task was built with.
    pub fn new() -> Self {
        Self {
            bindings: Arc::new(Mutex::new(HashMap::default())),
            manager: None,
            interrupt_on_cancel: false,
        }
    }

    /// Creates a binder submitting through `manager`.
    pub fn with_manager(manager: Arc<TaskPoolManager>) -> Self {
        Self {
            bindings: Arc::new(Mutex::new(HashMap::default())),
            manager: Some(manager),
            interrupt_on_cancel: false,
        }
    }

    /// Whether superseded and torn down tasks are cancelled with interruption.
    /// Default: `false`.
    #[inline]
    pub fn interrupt_on_cancel(mut self, interrupt: bool) -> Self {
        self.interrupt_on_cancel = interrupt;
        self
    }

    /// The pool manager, if any.
    #[inline]
    pub fn manager(&self) -> Option<&Arc<TaskPoolManager>> {
        self.manager.as_ref()
    }

    /// Binds `task` to `key`, cancelling the task bound there before.
    ///
    /// Returns `task` for chaining. The task is not submitted.
    pub fn bind<T: Send + Sync + 'static>(&self, key: K, task: Task<T>) -> Task<T> {
        let id = task.id();
        let mut bindings = lock(&self.bindings);

        let rebound = match bindings.remove(&key) {
            Some(previous) if previous.id() == id => true,
            Some(previous) => {
                previous.cancel(self.interrupt_on_cancel);
                debug!(superseded = %previous.id(), by = %id, "bound task superseded");
                false
            }
            None => false,
        };

        if !rebound {
            self.unbind_when_done(&key, &task);
        }

        bindings.insert(key, Box::new(task.clone()));
        task
    }

    /// Removes `key` once `task` delivered its completion, if it still owns it.
    fn unbind_when_done<T: Send + Sync + 'static>(&self, key: &K, task: &Task<T>) {
        let id = task.id();
        let weak = Arc::downgrade(&self.bindings);
        let owned_key = key.clone();
        task.add_listener(move || {
            if let Some(bindings) = weak.upgrade() {
                let mut bindings = lock(&bindings);
                if bindings.get(&owned_key).is_some_and(|bound| bound.id() == id) {
                    bindings.remove(&owned_key);
                }
            }
        });
    }

    /// Binds `task` to `key` and submits it.
    ///
    /// Submission goes through the pool manager when the binder has one,
    /// and through [`Task::execute`] otherwise. If it fails, the binding is
    /// undone and the error returned.
    pub fn bind_and_submit<T: Send + Sync + 'static>(
        &self,
        key: K,
        task: Task<T>,
    ) -> Result<Task<T>, SubmitError> {
        let task = self.bind(key.clone(), task);

        let submitted = match &self.manager {
            Some(manager) => manager.submit(&task),
            None => task.execute(),
        };

        if let Err(err) = submitted {
            let mut bindings = lock(&self.bindings);
            if bindings.get(&key).is_some_and(|bound| bound.id() == task.id()) {
                bindings.remove(&key);
            }
            return Err(err);
        }
        Ok(task)
    }

    /// Cancels and unbinds the task bound to `key`.
    ///
    /// Returns `false` if nothing was bound.
    pub fn cancel_for(&self, key: &K) -> bool {
        let removed = lock(&self.bindings).remove(key);
        match removed {
            Some(task) => {
                task.cancel(self.interrupt_on_cancel);
                true
            }
            None => false,
        }
    }

    /// Returns `true` if a task is bound to `key`.
    #[inline]
    pub fn is_bound(&self, key: &K) -> bool {
        lock(&self.bindings).contains_key(key)
    }
}

impl<K> ViewTaskBinder<K> {
    /// Cancels every bound task and unbinds them all.
    ///
    /// With a pool manager, every task registered with it is cancelled too.
    pub fn cancel_all(&self) {
        if let Some(manager) = &self.manager {
            manager.cancel_all(self.interrupt_on_cancel);
        }

        let mut bindings = lock(&self.bindings);
        let count = bindings.len();
        for (_, task) in bindings.drain() {
            task.cancel(self.interrupt_on_cancel);
        }
        debug!(count, "binder torn down");
    }

    /// Tears the binder down, see [`cancel_all`](Self::cancel_all).
    #[inline]
    pub fn dispose(self) {
        drop(self);
    }

    /// Number of bound tasks.
    #[inline]
    pub fn len(&self) -> usize {
        lock(&self.bindings).len()
    }

    /// Returns `true` if no task is bound.
    #[inline]
    pub fn is_empty(&self) -> bool {
        lock(&self.bindings).is_empty()
    }
}

impl<K: Eq + Hash + Clone + Send + 'static> Default for ViewTaskBinder<K> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Drop for ViewTaskBinder<K> {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

impl<K> fmt::Debug for ViewTaskBinder<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewTaskBinder")
            .field("len", &self.len())
            .field("has_manager", &self.manager.is_some())
            .field("interrupt_on_cancel", &self.interrupt_on_cancel)
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use alloc::string::String;
    use alloc::vec::Vec;
    use std::sync::Mutex;

    use super::ViewTaskBinder;
    use crate::test_utils::{Deferred, Inline, pump_until};
    use crate::{Coordinator, ScalingThreadPool, SubmitError, Task, TaskPoolManager};
    use atx_os::sync::Arc;

    type Log = Arc<Mutex<Vec<String>>>;

    fn named(coordinator: &Coordinator, log: &Log, name: &'static str) -> Task<&'static str> {
        let (success, cancelled) = (log.clone(), log.clone());
        Task::builder(&coordinator.handle(), move |_| Ok(name))
            .on_success(move |v| success.lock().unwrap().push(format!("{v} done")))
            .on_cancelled(move |_| cancelled.lock().unwrap().push(format!("{name} cancelled")))
            .build()
    }

    #[test]
    fn rebinding_cancels_previous_before_it_starts() {
        let coordinator = Coordinator::new();
        let log = Log::default();
        let executor = Deferred::default();
        let binder = ViewTaskBinder::new();

        let old = binder.bind(1, named(&coordinator, &log, "old"));
        old.execute_on(&executor).unwrap();
        let new = binder.bind(1, named(&coordinator, &log, "new"));
        assert!(old.is_cancelled());
        new.execute_on(&executor).unwrap();

        executor.run_all();
        let ticker = coordinator.ticker().unwrap();
        pump_until(&ticker, || old.is_finished() && new.is_finished());

        assert_eq!(*log.lock().unwrap(), ["old cancelled", "new done"]);
        assert!(binder.is_empty());
    }

    #[test]
    fn finished_task_unbinds_itself_only_if_current() {
        let coordinator = Coordinator::new();
        let log = Log::default();
        let binder = ViewTaskBinder::new();

        let first = binder.bind("a", named(&coordinator, &log, "first"));
        first.execute_on(&Inline).unwrap();
        assert!(binder.is_bound(&"a"));

        // Same key, different task: the first one's listener must not evict it.
        let executor = Deferred::default();
        let second = binder.bind("a", named(&coordinator, &log, "second"));
        second.execute_on(&executor).unwrap();
        coordinator.ticker().unwrap().drain();
        assert!(binder.is_bound(&"a"));

        executor.run_all();
        coordinator.ticker().unwrap().drain();
        assert!(!binder.is_bound(&"a"));
        assert_eq!(*log.lock().unwrap(), ["first cancelled", "second done"]);
    }

    #[test]
    fn rebinding_same_task_keeps_it_and_one_listener() {
        let coordinator = Coordinator::new();
        let log = Log::default();
        let binder = ViewTaskBinder::new();

        let task = binder.bind(5, named(&coordinator, &log, "same"));
        let task = binder.bind(5, task);
        assert!(!task.is_cancelled());
        assert_eq!(task.listener_count(), 1);
        assert_eq!(binder.len(), 1);

        task.execute_on(&Inline).unwrap();
        coordinator.ticker().unwrap().drain();
        assert!(binder.is_empty());
        assert_eq!(*log.lock().unwrap(), ["same done"]);
    }

    #[test]
    fn cancel_for_and_len() {
        let coordinator = Coordinator::new();
        let log = Log::default();
        let binder = ViewTaskBinder::new();

        binder.bind(1, named(&coordinator, &log, "one"));
        binder.bind(2, named(&coordinator, &log, "two"));
        assert_eq!(binder.len(), 2);

        assert!(binder.cancel_for(&1));
        assert!(!binder.cancel_for(&1));
        assert_eq!(binder.len(), 1);

        coordinator.ticker().unwrap().drain();
        assert_eq!(*log.lock().unwrap(), ["one cancelled"]);
    }

    #[test]
    fn submit_without_manager_uses_task_executor() {
        let coordinator = Coordinator::new();
        let binder = ViewTaskBinder::new();

        let bare = Task::new(&coordinator.handle(), |_| Ok(()));
        assert!(matches!(
            binder.bind_and_submit("k", bare),
            Err(SubmitError::NoExecutor(_))
        ));
        assert!(!binder.is_bound(&"k"));

        let task = Task::builder(&coordinator.handle(), |_| Ok(4))
            .executor(Arc::new(Inline))
            .build();
        let task = binder.bind_and_submit("k", task).unwrap();
        assert_eq!(task.get().unwrap(), 4);
    }

    #[test]
    fn teardown_cancels_binder_and_manager() {
        let coordinator = Coordinator::new();
        let pool = ScalingThreadPool::builder().max_threads(1).build().unwrap();
        let manager = Arc::new(TaskPoolManager::new(Arc::new(pool)));
        let (gate_tx, gate_rx) = async_channel::bounded::<()>(1);

        // Submitted straight through the manager, never bound.
        let unbound = Task::new(&coordinator.handle(), move |_| {
            gate_rx.recv_blocking().ok();
            Ok(())
        });
        manager.submit(&unbound).unwrap();

        let binder = ViewTaskBinder::with_manager(Arc::clone(&manager)).interrupt_on_cancel(true);
        let bound = binder
            .bind_and_submit(7, Task::new(&coordinator.handle(), |_| Ok(7)))
            .unwrap();
        let idle = binder.bind(8, Task::new(&coordinator.handle(), |_| Ok(8)));
        assert_eq!(manager.count(), 2);

        binder.dispose();
        assert_eq!(manager.count(), 0);
        assert!(unbound.is_cancelled() && bound.is_cancelled() && idle.is_cancelled());

        gate_tx.close();
        let ticker = coordinator.ticker().unwrap();
        pump_until(&ticker, || {
            unbound.is_finished() && bound.is_finished() && idle.is_finished()
        });
    }
}
