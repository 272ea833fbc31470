//! Blocking synchronization primitives.
//!
//! Provides [`Semaphore`], [`Lock`], and [`Condvar`]. All of them are bound
//! to a [`SyncDomain`](crate::SyncDomain) and block through its
//! [`Scheduler`](crate::Scheduler). Waiters are always woken highest
//! effective priority first.

pub(crate) mod cell;
mod condvar;
pub(crate) mod donation;
mod lock;
mod order;
mod semaphore;

pub(crate) mod loom_compat;

pub use cell::{PreemptCell, PreemptCellRef};
pub use condvar::Condvar;
pub use lock::Lock;
pub use semaphore::Semaphore;
