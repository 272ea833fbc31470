//! Contract violations.
//!
//! Misuse of a synchronization primitive (releasing a lock you do not hold,
//! blocking from an interrupt handler, a wait-for cycle) is a kernel bug, not
//! a recoverable condition. Every such case is described by a [`Violation`]
//! and reported through [`fatal`], which logs the violation and panics.
//!
//! Unlike `debug_assert!`, the [`assert_contract!`](crate::assert_contract)
//! macro stays active in release builds.

use core::fmt;

use crate::id::{LockId, ThreadId};

/// A broken usage contract of the synchronization core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// A blocking operation was attempted from interrupt context.
    InterruptContext {
        /// Name of the offending operation.
        operation: &'static str,
    },
    /// The holder of a lock tried to acquire it again.
    RecursiveAcquire {
        /// The lock.
        lock: LockId,
        /// The holder.
        thread: ThreadId,
    },
    /// A thread released a lock it does not hold.
    NotHolder {
        /// The lock.
        lock: LockId,
        /// The releasing thread.
        thread: ThreadId,
        /// The actual holder, if any.
        holder: Option<ThreadId>,
    },
    /// A condition variable was used without holding its lock.
    LockNotHeld {
        /// The lock that should have been held.
        lock: LockId,
        /// The calling thread.
        thread: ThreadId,
    },
    /// Donation found a cycle in the wait-for graph.
    WaitCycle {
        /// Lock at which the walk came back to a visited thread.
        lock: LockId,
        /// The thread that would have blocked.
        thread: ThreadId,
    },
    /// A thread tried to hold more locks than its record can track.
    TooManyLocks {
        /// The lock being recorded.
        lock: LockId,
        /// The capacity of the held-lock set.
        limit: usize,
    },
    /// A lock's holder does not list the lock among its held locks.
    HeldLockMissing {
        /// The lock.
        lock: LockId,
        /// The recorded holder.
        thread: ThreadId,
    },
    /// Returning a permit would overflow the semaphore's count.
    SemaphoreOverflow,
    /// A lock id has no entry in the lock table.
    UnknownLock {
        /// The missing lock.
        lock: LockId,
    },
    /// A protected cell was borrowed while already borrowed.
    Reentrancy {
        /// Name of the cell.
        cell: &'static str,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::InterruptContext { operation } => {
                write!(f, "{operation} called from interrupt context")
            }
            Self::RecursiveAcquire { lock, thread } => {
                write!(f, "{thread} already holds {lock}")
            }
            Self::NotHolder {
                lock,
                thread,
                holder: Some(holder),
            } => write!(f, "{thread} released {lock} held by {holder}"),
            Self::NotHolder {
                lock,
                thread,
                holder: None,
            } => write!(f, "{thread} released {lock} which is not held"),
            Self::LockNotHeld { lock, thread } => {
                write!(f, "{thread} used a condition variable without holding {lock}")
            }
            Self::WaitCycle { lock, thread } => {
                write!(f, "wait-for cycle through {lock}: {thread} would deadlock")
            }
            Self::TooManyLocks { lock, limit } => {
                write!(f, "thread holds too many locks (limit {limit}) acquiring {lock}")
            }
            Self::HeldLockMissing { lock, thread } => {
                write!(f, "{lock} is held by {thread} but missing from its held locks")
            }
            Self::SemaphoreOverflow => f.write_str("semaphore value overflow"),
            Self::UnknownLock { lock } => write!(f, "{lock} is not registered"),
            Self::Reentrancy { cell } => write!(f, "reentrant borrow of {cell}"),
        }
    }
}

/// Reports a contract violation and halts the current thread of execution.
///
/// Logs at `error` level first so that the violation reaches the kernel log
/// even if the panic handler itself cannot format.
#[cold]
#[track_caller]
pub fn fatal(violation: Violation) -> ! {
    log::error!("synch: {violation}");
    panic!("contract violation: {violation}");
}

/// Checks a usage contract, calling [`fatal`] with the given [`Violation`]
/// when the condition is false.
///
/// The violation expression is only evaluated on failure.
///
/// # Examples
///
/// ```ignore
/// assert_contract!(
///     !sched.in_interrupt_context(),
///     Violation::InterruptContext { operation: "Lock::acquire" }
/// );
/// ```
#[macro_export]
macro_rules! assert_contract {
    ($cond:expr, $violation:expr $(,)?) => {
        if !$cond {
            $crate::contract::fatal($violation);
        }
    };
}
