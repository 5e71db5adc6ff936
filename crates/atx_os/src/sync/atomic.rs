//! Provide atomic types
//!
//! See the [standard library] for further details.
//!
//! [standard library]: https://doc.rust-lang.org/core/sync/atomic

pub use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize};
pub use core::sync::atomic::Ordering;

#[cfg(not(target_has_atomic = "64"))]
compile_error!("Platforms without 64-bit atomics are currently not supported.");
