//! Thread synchronization core for the Hadron teaching kernel.
//!
//! Provides counting [`Semaphore`]s, single-owner [`Lock`]s with recursive
//! priority donation, and Mesa-style [`Condvar`]s. Every waiter collection
//! is served highest-effective-priority first, re-evaluated at wake time.
//!
//! The crate does not own threads or the run queue. It talks to the
//! scheduler through the narrow [`Scheduler`] trait and keeps its own share
//! of the wait-for graph (the lock table) inside a [`SyncDomain`]. Like
//! `hadron-core`, it is `no_std` in kernel builds and host-testable with
//! `cargo test`, where a simulated uniprocessor scheduler stands in for the
//! kernel.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

extern crate alloc;

pub mod config;
pub mod contract;
pub mod domain;
pub mod id;
pub mod sched;
pub mod sync;
pub mod thread;

#[cfg(test)]
pub(crate) mod sim;

pub use config::SyncConfig;
pub use contract::Violation;
pub use domain::SyncDomain;
pub use id::{LockId, ThreadId};
pub use sched::{PreemptGuard, PreemptState, Scheduler};
pub use sync::{Condvar, Lock, Semaphore};
pub use thread::{Priority, ThreadSynch};
