//! Thread helpers.

pub use std::thread::{JoinHandle, ThreadId};

use core::num::NonZero;

// -----------------------------------------------------------------------------
// available_parallelism

/// Returns an estimate of the default amount of parallelism a program should use.
///
/// It's similar to [`std::thread::available_parallelism`],
/// but when the query fails it returns `1`.
pub fn available_parallelism() -> NonZero<usize> {
    std::thread::available_parallelism().unwrap_or(NonZero::<usize>::MIN)
}

/// Returns the id of the calling thread.
#[inline]
pub fn current_id() -> ThreadId {
    std::thread::current().id()
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    #[test]
    fn parallelism_is_positive() {
        assert!(super::available_parallelism().get() >= 1);
    }

    #[test]
    fn current_id_differs_across_threads() {
        let here = super::current_id();
        let there = std::thread::spawn(super::current_id).join().unwrap();
        assert_ne!(here, there);
        assert_eq!(here, super::current_id());
    }
}
