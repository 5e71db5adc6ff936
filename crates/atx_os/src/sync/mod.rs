//! Synchronization primitives.
//!
//! The pool, the coordinator and the task state machine all share one set of
//! primitives, re-exported here so the crates above never reach into `std`
//! directly.
//!
//! Locks in this workspace never propagate poisoning: a panic inside a user
//! callback is caught before it can unwind through a guard, so callers recover
//! the guard with [`PoisonError::into_inner`] instead of unwrapping.
//!
//! See the [standard library] for further details.
//!
//! [standard library]: https://doc.rust-lang.org/std/sync/index.html

// -----------------------------------------------------------------------------
// Modules

pub mod atomic;

// -----------------------------------------------------------------------------
// Exports

pub use std::sync::Arc;

pub use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

// -----------------------------------------------------------------------------
// lock

/// Locks `mutex`, recovering the guard if a previous holder panicked.
#[inline]
pub fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::{Arc, Mutex, lock};

    #[test]
    fn lock_recovers_poisoned() {
        let mutex = Arc::new(Mutex::new(1_u32));

        let cloned = Arc::clone(&mutex);
        let res = std::thread::spawn(move || {
            let _guard = cloned.lock().unwrap();
            panic!("poison");
        })
        .join();
        assert!(res.is_err());
        assert!(mutex.is_poisoned());

        *lock(&mutex) += 1;
        assert_eq!(*lock(&mutex), 2);
    }
}
