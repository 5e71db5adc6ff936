//! The scaling thread pool.
//!
//! - [`ScalingQueue`]: admission queue deciding between growth and queueing.
//! - [`ForceQueuePolicy`]: saturation handler, queues instead of rejecting.
//! - [`ScalingThreadPool`]: the pool, built by [`ScalingThreadPoolBuilder`].

// -----------------------------------------------------------------------------
// Modules

mod builder;
mod executor;
mod force_queue;
mod scaling_queue;

// -----------------------------------------------------------------------------
// Exports

pub use builder::ScalingThreadPoolBuilder;
pub use executor::{Executor, Job, ScalingThreadPool};
pub use force_queue::ForceQueuePolicy;
pub use scaling_queue::{Load, ScalingQueue};
