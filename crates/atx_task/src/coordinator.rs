//! The coordinator: the one thread that sees task completions.
//!
//! Workers never run user callbacks. They post a completion event to the
//! coordinator's channel, and whichever thread owns the [`Coordinator`]
//! drains it. Completion callbacks of different tasks are therefore never
//! concurrent with each other, and state touched only from callbacks needs no
//! locking.
//!
//! There are two ways to own one:
//!
//! - [`Coordinator::new`] binds it to the calling thread, which then drives it
//!   explicitly through a [`CoordinatorTicker`] (e.g. from its own event loop).
//! - [`CoordinatorThread::spawn`] starts a dedicated thread that does nothing
//!   but drain the channel until the coordinator is closed.

use alloc::boxed::Box;
use alloc::string::String;
use core::fmt;
use core::marker::PhantomData;
use std::io;
use std::thread;

use async_channel::{Receiver, Sender};
use atx_os::thread::{JoinHandle, ThreadId};
use futures_lite::future;
use tracing::{debug, warn};

/// A completion event, run on the coordinator thread.
pub(crate) type Delivery = Box<dyn FnOnce() + Send + 'static>;

// -----------------------------------------------------------------------------
// Coordinator

/// A **thread-affine** multi-producer, single-consumer event queue.
///
/// Events may be posted from any thread through a [`CoordinatorHandle`], but
/// they only run on the thread that created the coordinator, and only when
/// that thread ticks it.
///
/// The coordinator does not run in the background. Use [`CoordinatorThread`]
/// if no existing thread can spare the time to tick it.
///
/// # Examples
///
/// ```
/// use atx_task::{Coordinator, ScalingThreadPoolBuilder, Task};
/// use std::sync::Arc;
///
/// let coordinator = Coordinator::new();
/// let pool = Arc::new(ScalingThreadPoolBuilder::new().build().unwrap());
///
/// let task = Task::builder(&coordinator.handle(), |_| Ok(21 * 2))
///     .on_success(|v: &i32| assert_eq!(*v, 42))
///     .build();
/// task.execute_on(&*pool).unwrap();
///
/// assert_eq!(task.get().unwrap(), 42);
///
/// // The success callback runs here, on the thread that owns the coordinator.
/// let ticker = coordinator.ticker().unwrap();
/// while !task.is_finished() {
///     ticker.try_tick();
/// }
/// ```
pub struct Coordinator {
    sender: Sender<Delivery>,
    receiver: Receiver<Delivery>,
    // The thread on which this coordinator was created.
    thread_id: ThreadId,
}

impl Coordinator {
    /// Creates a coordinator owned by the calling thread.
    pub fn new() -> Self {
        let (sender, receiver) = async_channel::unbounded();
        Self {
            sender,
            receiver,
            thread_id: atx_os::thread::current_id(),
        }
    }

    /// Returns a handle for posting events to this coordinator.
    #[inline]
    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle {
            sender: self.sender.clone(),
            thread_id: self.thread_id,
        }
    }

    /// Returns a ticker that can drive this coordinator.
    ///
    /// The ticker is only available on the thread where the coordinator was
    /// created. Calling this method from any other thread returns `None`.
    ///
    /// The returned [`CoordinatorTicker`] is neither `Send` nor `Sync`.
    #[inline]
    pub fn ticker(&self) -> Option<CoordinatorTicker<'_>> {
        if atx_os::thread::current_id() == self.thread_id {
            Some(CoordinatorTicker {
                coordinator: self,
                _marker: PhantomData,
            })
        } else {
            None
        }
    }

    /// The owning thread.
    #[inline]
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Number of events waiting to run.
    #[inline]
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// Closes the coordinator.
    ///
    /// Events already posted can still be ticked; new ones are dropped.
    /// Returns `false` if it was already closed.
    #[inline]
    pub fn close(&self) -> bool {
        self.sender.close()
    }
}

impl Default for Coordinator {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("thread_id", &self.thread_id)
            .field("pending", &self.receiver.len())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// CoordinatorHandle

/// A cloneable, `Send` handle posting events to a [`Coordinator`].
#[derive(Clone)]
pub struct CoordinatorHandle {
    sender: Sender<Delivery>,
    thread_id: ThreadId,
}

impl CoordinatorHandle {
    /// Enqueues `delivery`. Returns `false` and drops it when the coordinator
    /// is closed.
    pub(crate) fn post(&self, delivery: Delivery) -> bool {
        match self.sender.try_send(delivery) {
            Ok(()) => true,
            Err(_) => {
                warn!("coordinator closed, completion event dropped");
                false
            }
        }
    }

    /// Returns `true` when called on the coordinator's thread.
    #[inline]
    pub fn is_coordinator_thread(&self) -> bool {
        atx_os::thread::current_id() == self.thread_id
    }

    /// The coordinator's thread.
    #[inline]
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Returns `true` once the coordinator stopped accepting events.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Closes the coordinator, see [`Coordinator::close`].
    #[inline]
    pub fn close(&self) -> bool {
        self.sender.close()
    }
}

impl fmt::Debug for CoordinatorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorHandle")
            .field("thread_id", &self.thread_id)
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// CoordinatorTicker

/// A handle used to explicitly **drive a [`Coordinator`]** forward.
///
/// A coordinator does not make progress unless it is ticked. This type is
/// bound to the coordinator's thread and cannot be sent or shared.
#[derive(Debug)]
pub struct CoordinatorTicker<'a> {
    coordinator: &'a Coordinator,
    // make type not send or sync
    _marker: PhantomData<*const ()>,
}

impl CoordinatorTicker<'_> {
    /// Runs one pending event, if any.
    ///
    /// Returns `false` if nothing was waiting.
    #[inline]
    pub fn try_tick(&self) -> bool {
        match self.coordinator.receiver.try_recv() {
            Ok(delivery) => {
                delivery();
                true
            }
            Err(_) => false,
        }
    }

    /// Runs every pending event and returns how many ran.
    ///
    /// Events posted by the ones being run are included.
    pub fn drain(&self) -> usize {
        let mut count = 0;
        while self.try_tick() {
            count += 1;
        }
        count
    }

    /// Waits for the next event and runs it.
    ///
    /// Returns `false` once the coordinator is closed and empty.
    pub async fn tick(&self) -> bool {
        match self.coordinator.receiver.recv().await {
            Ok(delivery) => {
                delivery();
                true
            }
            Err(_) => false,
        }
    }

    /// Runs events until the coordinator is closed and empty.
    pub async fn run(&self) {
        while self.tick().await {}
    }

    /// Blocking version of [`run`](Self::run).
    #[inline]
    pub fn run_blocking(&self) {
        future::block_on(self.run());
    }
}

// -----------------------------------------------------------------------------
// CoordinatorThread

/// A dedicated thread owning a [`Coordinator`] and draining it.
///
/// Dropping it closes the coordinator, lets the thread run what was already
/// posted, and joins it.
///
/// # Examples
///
/// ```
/// use atx_task::CoordinatorThread;
///
/// let coordinator = CoordinatorThread::spawn("coordinator").unwrap();
/// let handle = coordinator.handle().clone();
/// assert!(!handle.is_coordinator_thread());
/// drop(coordinator);
/// assert!(handle.is_closed());
/// ```
pub struct CoordinatorThread {
    handle: CoordinatorHandle,
    thread: Option<JoinHandle<()>>,
}

impl CoordinatorThread {
    /// Starts a thread named `name` that owns and drains a new coordinator.
    pub fn spawn(name: impl Into<String>) -> io::Result<Self> {
        let (handle_tx, handle_rx) = async_channel::bounded(1);

        let thread = thread::Builder::new().name(name.into()).spawn(move || {
            let coordinator = Coordinator::new();
            if handle_tx.send_blocking(coordinator.handle()).is_err() {
                return;
            }
            drop(handle_tx);

            if let Some(ticker) = coordinator.ticker() {
                ticker.run_blocking();
            }
            debug!("coordinator thread stopped");
        })?;

        let handle = handle_rx
            .recv_blocking()
            .map_err(|_| io::Error::other("coordinator thread exited during startup"))?;

        debug!(thread = ?handle.thread_id(), "coordinator thread started");

        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    /// Returns the handle tasks post their completions to.
    #[inline]
    pub fn handle(&self) -> &CoordinatorHandle {
        &self.handle
    }

    /// The coordinator's thread.
    #[inline]
    pub fn thread_id(&self) -> ThreadId {
        self.handle.thread_id
    }
}

impl Drop for CoordinatorThread {
    fn drop(&mut self) {
        self.handle.close();

        if let Some(thread) = self.thread.take() {
            if thread.thread().id() == atx_os::thread::current_id() {
                return;
            }
            if thread.join().is_err() {
                warn!("coordinator thread panicked");
            }
        }
    }
}

impl fmt::Debug for CoordinatorThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorThread")
            .field("handle", &self.handle)
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;
    use std::sync::{Arc, Mutex};
    use std::thread;

    use super::*;

    #[test]
    fn ticker_only_on_owner() {
        let coordinator = Arc::new(Coordinator::new());
        assert!(coordinator.ticker().is_some());

        let remote = Arc::clone(&coordinator);
        let has_ticker = thread::spawn(move || remote.ticker().is_some())
            .join()
            .unwrap();
        assert!(!has_ticker);
    }

    #[test]
    fn events_run_in_order_on_owner() {
        let coordinator = Coordinator::new();
        let owner = thread::current().id();
        let log = Arc::new(Mutex::new(Vec::new()));

        let handle = coordinator.handle();
        let remote_log = Arc::clone(&log);
        thread::spawn(move || {
            for i in 0..10 {
                let log = Arc::clone(&remote_log);
                assert!(handle.post(Box::new(move || {
                    assert_eq!(thread::current().id(), owner);
                    log.lock().unwrap().push(i);
                })));
            }
        })
        .join()
        .unwrap();

        assert_eq!(coordinator.pending(), 10);
        assert!(log.lock().unwrap().is_empty());

        let ticker = coordinator.ticker().unwrap();
        assert_eq!(ticker.drain(), 10);
        assert!(!ticker.try_tick());
        assert_eq!(*log.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn closed_coordinator_drops_new_events() {
        let coordinator = Coordinator::new();
        let handle = coordinator.handle();

        assert!(handle.post(Box::new(|| {})));
        assert!(coordinator.close());
        assert!(handle.is_closed());
        assert!(!handle.post(Box::new(|| unreachable!())));

        // What was posted before closing still runs.
        let ticker = coordinator.ticker().unwrap();
        assert_eq!(ticker.drain(), 1);
        assert!(!future::block_on(ticker.tick()));
    }

    #[test]
    fn dedicated_thread_runs_and_drains() {
        let coordinator = CoordinatorThread::spawn("test-coordinator").unwrap();
        let coordinator_id = coordinator.thread_id();
        assert_ne!(coordinator_id, thread::current().id());

        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let seen = Arc::clone(&seen);
            coordinator.handle().post(Box::new(move || {
                seen.lock().unwrap().push((i, thread::current().id()));
            }));
        }

        drop(coordinator);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 5);
        assert!(seen.iter().all(|(_, id)| *id == coordinator_id));
        assert_eq!(seen.iter().map(|(i, _)| *i).collect::<Vec<_>>(), [0, 1, 2, 3, 4]);
    }
}
