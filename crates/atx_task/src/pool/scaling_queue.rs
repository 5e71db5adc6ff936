use alloc::collections::VecDeque;
use core::fmt;

// -----------------------------------------------------------------------------
// Load

/// A snapshot of how busy a pool is, taken under the pool lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Load {
    /// Workers currently executing a job body.
    pub active: usize,
    /// Worker threads alive, busy or idle.
    pub live: usize,
}

// -----------------------------------------------------------------------------
// ScalingQueue

/// The admission queue of a [`ScalingThreadPool`].
///
/// A plain FIFO whose [`offer`] refuses an item whenever admitting it would
/// leave it waiting behind busy workers, i.e. whenever
/// `active + queued >= live`. A refused offer is the signal for the pool to
/// start another worker instead. [`put`] always admits and is what the
/// saturation handler falls back to once the pool cannot grow.
///
/// The queue is logically unbounded. It has no lock of its own: it lives
/// inside the pool state, so the admission rule, worker retirement and
/// dequeuing are all serialized by the pool lock, and blocking takes are
/// implemented by the pool's condition variable.
///
/// [`ScalingThreadPool`]: crate::ScalingThreadPool
/// [`offer`]: ScalingQueue::offer
/// [`put`]: ScalingQueue::put
pub struct ScalingQueue<T> {
    items: VecDeque<T>,
}

impl<T> ScalingQueue<T> {
    /// Creates an empty queue.
    #[inline]
    pub const fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    /// Returns `true` if a pool under `load` with `queued` waiting items has an
    /// idle worker for one more.
    #[inline]
    pub const fn admits(load: Load, queued: usize) -> bool {
        load.active + queued < load.live
    }

    /// Inserts `item` at the tail if at least one live worker is free to take
    /// it, otherwise hands it back.
    pub fn offer(&mut self, item: T, load: Load) -> Result<(), T> {
        if Self::admits(load, self.items.len()) {
            self.items.push_back(item);
            Ok(())
        } else {
            Err(item)
        }
    }

    /// Inserts `item` at the tail unconditionally.
    #[inline]
    pub fn put(&mut self, item: T) {
        self.items.push_back(item);
    }

    /// Inserts `item` at the head, ahead of everything already waiting.
    ///
    /// Used to hand the first job to a freshly started worker.
    #[inline]
    pub(crate) fn put_front(&mut self, item: T) {
        self.items.push_front(item);
    }

    /// Removes the head item.
    #[inline]
    pub fn poll(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Number of queued items.
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if nothing is queued.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> Default for ScalingQueue<T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ScalingQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScalingQueue")
            .field("len", &self.items.len())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Tests
