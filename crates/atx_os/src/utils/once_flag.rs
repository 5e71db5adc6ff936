use crate::sync::atomic::{AtomicBool, Ordering};

// -----------------------------------------------------------------------------
// OnceFlag

/// Wrapper around an [`AtomicBool`] that yields `true` exactly once.
///
/// Only the first call to [`set`](OnceFlag::set) observes `true`, no matter
/// how many threads race on it. The flag says nothing about the visibility of
/// other memory, pair it with a lock or a channel when the winner publishes
/// data.
///
/// # Example
///
/// ```
/// # use atx_os::utils::OnceFlag;
///
/// let flag = OnceFlag::new();
/// let mut count = 0;
/// for _ in 0..5 {
///     if flag.set() {
///         count += 1;
///     }
/// }
/// assert_eq!(count, 1);
/// assert!(flag.is_set());
/// ```
#[repr(transparent)]
pub struct OnceFlag(AtomicBool);

impl OnceFlag {
    /// Create new object, default inner value is `true`.
    #[inline]
    pub const fn new() -> Self {
        Self(AtomicBool::new(true))
    }

    /// Set inner value to `false` and return old value.
    #[inline]
    pub fn set(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    /// Returns `true` once [`set`](OnceFlag::set) has been called.
    #[inline]
    pub fn is_set(&self) -> bool {
        !self.0.load(Ordering::Acquire)
    }
}

impl Default for OnceFlag {
    /// Call `new`, default inner value is `true`.
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for OnceFlag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("OnceFlag").field(&self.is_set()).finish()
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::OnceFlag;

    #[test]
    fn single_winner_across_threads() {
        let flag = OnceFlag::new();
        let winners = AtomicUsize::new(0);

        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    if flag.set() {
                        winners.fetch_add(1, Ordering::Relaxed);
                    }
                });
            }
        });

        assert_eq!(winners.load(Ordering::Relaxed), 1);
        assert!(flag.is_set());
    }
}
