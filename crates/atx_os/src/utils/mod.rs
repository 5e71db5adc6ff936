//! Low-level building blocks built on atomic operations.
//!
//! - [`OnceFlag`] : A lightweight flag ensuring true appears only once. Used to
//!   guard exactly-once completion delivery.
//! - [`CachePadded`] : Pads a value to its own cache line, for counters that
//!   many threads hammer at once.

// -----------------------------------------------------------------------------
// Modules

mod cache_padded;
mod once_flag;

// -----------------------------------------------------------------------------
// Exports

pub use cache_padded::CachePadded;
pub use once_flag::OnceFlag;
