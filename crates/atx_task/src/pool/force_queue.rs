use tracing::trace;

use super::ScalingQueue;

// -----------------------------------------------------------------------------
// ForceQueuePolicy

/// Saturation handler of a [`ScalingThreadPool`].
///
/// Runs only when the pool already has `max_threads` workers and the
/// [`ScalingQueue`] declined the job. Instead of rejecting, it inserts the job
/// with [`ScalingQueue::put`], so a submitted job is never dropped.
///
/// The queue is unbounded, so the insert cannot fail and the caller is never
/// blocked for longer than the pool lock is held.
///
/// [`ScalingThreadPool`]: crate::ScalingThreadPool
#[derive(Debug, Default, Clone, Copy)]
pub struct ForceQueuePolicy;

impl ForceQueuePolicy {
    /// Forces `job` into `queue`.
    #[inline]
    pub fn saturated<T>(&self, job: T, queue: &mut ScalingQueue<T>) {
        queue.put(job);
        trace!(queued = queue.len(), "pool saturated, job force-queued");
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::ForceQueuePolicy;
    use crate::pool::{Load, ScalingQueue};

    #[test]
    fn forces_past_refusal() {
        let mut queue = ScalingQueue::new();
        let load = Load { active: 1, live: 1 };

        let job = queue.offer("job", load).unwrap_err();
        ForceQueuePolicy.saturated(job, &mut queue);

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.poll(), Some("job"));
    }
}
