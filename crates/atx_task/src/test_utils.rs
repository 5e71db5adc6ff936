//! Executors and helpers shared by the unit tests.

use alloc::vec::Vec;
use core::time::Duration;
use std::sync::Mutex;
use std::thread;
use std::time::Instant;

use crate::{CoordinatorTicker, Executor, Job, PoolError};

/// Runs jobs on the submitting thread.
pub(crate) struct Inline;

impl Executor for Inline {
    fn execute(&self, job: Job) -> Result<(), PoolError> {
        job();
        Ok(())
    }
}

/// Holds jobs until `run_all`.
#[derive(Default)]
pub(crate) struct Deferred(Mutex<Vec<Job>>);

impl Deferred {
    pub(crate) fn run_all(&self) {
        let jobs = core::mem::take(&mut *self.0.lock().unwrap());
        jobs.into_iter().for_each(|job| job());
    }
}

impl Executor for Deferred {
    fn execute(&self, job: Job) -> Result<(), PoolError> {
        self.0.lock().unwrap().push(job);
        Ok(())
    }
}

/// Rejects everything.
pub(crate) struct Closed;

impl Executor for Closed {
    fn execute(&self, _job: Job) -> Result<(), PoolError> {
        Err(PoolError::Shutdown)
    }
}

/// Ticks the coordinator until `done` holds, failing after ten seconds.
pub(crate) fn pump_until(ticker: &CoordinatorTicker<'_>, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done() {
        assert!(Instant::now() < deadline, "condition not reached");
        if !ticker.try_tick() {
            thread::sleep(Duration::from_millis(1));
        }
    }
}
