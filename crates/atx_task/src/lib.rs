#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]

extern crate alloc;

// -----------------------------------------------------------------------------
// Modules

mod binder;
mod coordinator;
mod error;
mod manager;
mod pool;
mod task;

#[cfg(test)]
mod test_utils;

// -----------------------------------------------------------------------------
// Exports

pub use error::{BoxError, PoolError, SubmitError, TaskError};

pub use pool::{Executor, Job};
pub use pool::{ForceQueuePolicy, Load, ScalingQueue};
pub use pool::{ScalingThreadPool, ScalingThreadPoolBuilder};

pub use coordinator::{Coordinator, CoordinatorHandle, CoordinatorThread, CoordinatorTicker};

pub use task::{ListenerId, Status, TaskHandle, TaskId};
pub use task::{Task, TaskBuilder, TaskContext};

pub use binder::ViewTaskBinder;
pub use manager::TaskPoolManager;

// -----------------------------------------------------------------------------
// Re-Exports

pub use futures_lite;
