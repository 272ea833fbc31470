//! Per-thread synchronization state.
//!
//! [`ThreadSynch`] is the slice of a thread control block that the
//! synchronization core reads and writes. The scheduler owns the storage and
//! lends it out through [`Scheduler::with_thread`](crate::Scheduler::with_thread).

use core::fmt;

use planck_noalloc::vec::ArrayVec;

use crate::contract::Violation;
use crate::id::LockId;

/// Maximum number of locks a single thread may hold at once.
pub const MAX_HELD_LOCKS: usize = 16;

/// Thread scheduling priority. Numerically larger is more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Priority(u8);

impl Priority {
    /// Lowest priority.
    pub const MIN: Self = Self(0);
    /// Priority given to threads that do not ask for one.
    pub const DEFAULT: Self = Self(31);
    /// Highest priority.
    pub const MAX: Self = Self(63);

    /// Creates a priority, clamping values above [`Priority::MAX`].
    pub const fn new(val: u8) -> Self {
        if val > Self::MAX.0 {
            Self::MAX
        } else {
            Self(val)
        }
    }

    /// Returns the raw `u8` value.
    pub const fn as_u8(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Donation-related fields of a thread.
///
/// `base_priority` is `Some` exactly while a donation is in effect and holds
/// the priority to fall back to once every donation is undone.
pub struct ThreadSynch {
    pub(crate) priority: Priority,
    pub(crate) base_priority: Option<Priority>,
    pub(crate) waiting_on: Option<LockId>,
    held_locks: ArrayVec<LockId, MAX_HELD_LOCKS>,
}

impl ThreadSynch {
    /// Creates the record for a thread that holds nothing and waits on nothing.
    pub const fn new(priority: Priority) -> Self {
        Self {
            priority,
            base_priority: None,
            waiting_on: None,
            held_locks: ArrayVec::new(),
        }
    }

    /// Current effective priority, including any donation.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Priority to restore once donations end, if a donation is in effect.
    pub fn base_priority(&self) -> Option<Priority> {
        self.base_priority
    }

    /// Returns `true` if another thread has donated priority to this one.
    pub fn is_donated(&self) -> bool {
        self.base_priority.is_some()
    }

    /// The lock this thread is currently blocked acquiring.
    pub fn waiting_on(&self) -> Option<LockId> {
        self.waiting_on
    }

    /// Iterates over the locks this thread holds, in acquisition order.
    pub fn held_locks(&self) -> impl Iterator<Item = LockId> + '_ {
        self.held_locks.iter().copied()
    }

    /// Number of locks this thread holds.
    pub fn held_count(&self) -> usize {
        self.held_locks.len()
    }

    /// Returns `true` if `lock` is among the held locks.
    pub fn holds(&self, lock: LockId) -> bool {
        self.held_locks().any(|held| held == lock)
    }

    /// Raises the effective priority to `priority` if it is higher,
    /// checkpointing the un-donated priority on the first donation.
    pub(crate) fn receive_donation(&mut self, priority: Priority) -> bool {
        if self.priority >= priority {
            return false;
        }
        if self.base_priority.is_none() {
            self.base_priority = Some(self.priority);
        }
        self.priority = priority;
        true
    }

    pub(crate) fn push_held(&mut self, lock: LockId) -> Result<(), Violation> {
        if self.held_locks.len() >= MAX_HELD_LOCKS {
            return Err(Violation::TooManyLocks {
                lock,
                limit: MAX_HELD_LOCKS,
            });
        }
        self.held_locks.push(lock);
        Ok(())
    }

    pub(crate) fn remove_held(&mut self, lock: LockId) -> bool {
        match self.held_locks.iter().position(|&held| held == lock) {
            Some(i) => {
                self.held_locks.remove(i);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for ThreadSynch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadSynch")
            .field("priority", &self.priority)
            .field("base_priority", &self.base_priority)
            .field("waiting_on", &self.waiting_on)
            .field("held_locks", &self.held_locks.as_slice())
            .finish()
    }
}
