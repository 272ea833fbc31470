//! Interior mutability for state shared by the synchronization primitives.
//!
//! A [`PreemptCell`] can only be borrowed by presenting a [`PreemptGuard`],
//! so every access statically happens inside a protected section. On a
//! uniprocessor with preemption masked nobody else can run, which leaves one
//! way to alias the contents: a nested borrow from the same thread. An
//! atomic flag catches that and reports [`Violation::Reentrancy`].

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

use super::loom_compat::{AtomicBool, Ordering};
use crate::contract::{self, Violation};
use crate::sched::{PreemptGuard, Scheduler};

/// Cell whose contents are reachable only inside a protected section.
pub struct PreemptCell<T> {
    borrowed: AtomicBool,
    name: &'static str,
    data: UnsafeCell<T>,
}

// SAFETY: Access to `data` requires winning the `borrowed` flag, so at most
// one `PreemptCellRef` exists at a time.
unsafe impl<T: Send> Send for PreemptCell<T> {}
unsafe impl<T: Send> Sync for PreemptCell<T> {}

impl<T> PreemptCell<T> {
    /// Creates a cell. `name` identifies it in violation reports.
    pub fn new(name: &'static str, value: T) -> Self {
        Self {
            borrowed: AtomicBool::new(false),
            name,
            data: UnsafeCell::new(value),
        }
    }

    /// Borrows the contents for the lifetime of the returned reference.
    ///
    /// The guard proves preemption is masked. Borrowing while a previous
    /// borrow is still alive is fatal.
    #[track_caller]
    pub fn borrow_mut<'a, S: Scheduler>(
        &'a self,
        _guard: &'a PreemptGuard<'_, S>,
    ) -> PreemptCellRef<'a, T> {
        match self.try_claim() {
            Some(cell) => cell,
            None => contract::fatal(Violation::Reentrancy { cell: self.name }),
        }
    }

    /// Claims the borrow flag without requiring a guard.
    pub(crate) fn try_claim(&self) -> Option<PreemptCellRef<'_, T>> {
        self.borrowed
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| PreemptCellRef { cell: self })
    }

    /// Consumes the cell, returning the contents.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

/// Exclusive borrow of a [`PreemptCell`].
pub struct PreemptCellRef<'a, T> {
    cell: &'a PreemptCell<T>,
}

impl<T> Deref for PreemptCellRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: We own the borrow flag.
        unsafe { &*self.cell.data.get() }
    }
}

impl<T> DerefMut for PreemptCellRef<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: We own the borrow flag.
        unsafe { &mut *self.cell.data.get() }
    }
}

impl<T> Drop for PreemptCellRef<'_, T> {
    fn drop(&mut self) {
        self.cell.borrowed.store(false, Ordering::Release);
    }
}
