//! Single-owner lock with priority donation.

use super::donation;
use super::semaphore::Semaphore;
use crate::assert_contract;
use crate::contract::{self, Violation};
use crate::domain::SyncDomain;
use crate::id::{LockId, ThreadId};
use crate::sched::Scheduler;
use crate::thread::Priority;

/// A mutual-exclusion lock built on a binary [`Semaphore`].
///
/// At most one thread holds the lock, and only the holder may release it.
/// A thread that blocks in [`acquire`](Self::acquire) donates its priority
/// to the holder (and transitively to whatever the holder waits for), so a
/// low-priority holder cannot be starved by medium-priority threads while a
/// high-priority thread waits. The lock is not recursive.
pub struct Lock<'d, S: Scheduler> {
    domain: &'d SyncDomain<S>,
    id: LockId,
    sema: Semaphore<'d, S>,
}

impl<'d, S: Scheduler> Lock<'d, S> {
    /// Creates a free lock and registers it with `domain`.
    pub fn new(domain: &'d SyncDomain<S>) -> Self {
        let id = {
            let guard = domain.preempt();
            domain.locks(&guard).register()
        };
        Self {
            domain,
            id,
            sema: Semaphore::new(domain, 1),
        }
    }

    /// Acquires the lock, sleeping until it is available.
    ///
    /// # Panics
    ///
    /// Fatal from interrupt context or if the caller already holds the lock.
    #[track_caller]
    pub fn acquire(&self) {
        let sched = self.domain.scheduler();
        assert_contract!(
            !sched.in_interrupt_context(),
            Violation::InterruptContext {
                operation: "Lock::acquire"
            }
        );

        let me = sched.current_thread();
        let guard = self.domain.preempt();
        let holder = self.domain.locks(&guard).node(self.id).holder;
        assert_contract!(
            holder != Some(me),
            Violation::RecursiveAcquire {
                lock: self.id,
                thread: me
            }
        );

        sched.with_thread(me, |t| t.waiting_on = Some(self.id));
        if holder.is_some() {
            donation::donate(self.domain, &guard, self.id, me);
        }

        self.sema.down();

        sched.with_thread(me, |t| t.waiting_on = None);
        self.take_ownership(me);
        let top_waiter = self.sema.top_waiter_priority(&guard);
        donation::inherit(self.domain, &guard, self.id, me, top_waiter);
    }

    /// Acquires the lock if it is free. Never blocks and never donates.
    ///
    /// # Panics
    ///
    /// Fatal if the caller already holds the lock.
    #[track_caller]
    pub fn try_acquire(&self) -> bool {
        let sched = self.domain.scheduler();
        let me = sched.current_thread();
        let _guard = self.domain.preempt();
        assert_contract!(
            self.holder() != Some(me),
            Violation::RecursiveAcquire {
                lock: self.id,
                thread: me
            }
        );

        if !self.sema.try_down() {
            return false;
        }
        self.take_ownership(me);
        true
    }

    /// Releases the lock, undoing whatever priority it carried to the
    /// caller, and wakes the most urgent waiter.
    ///
    /// The waiter is readied in the same protected section that lowers the
    /// caller's priority, so no thread ranked between the two can run first.
    ///
    /// # Panics
    ///
    /// Fatal unless the caller holds the lock.
    #[track_caller]
    pub fn release(&self) {
        let sched = self.domain.scheduler();
        let me = sched.current_thread();
        let preempted = {
            let guard = self.domain.preempt();
            let holder = self.domain.locks(&guard).node(self.id).holder;
            assert_contract!(
                holder == Some(me),
                Violation::NotHolder {
                    lock: self.id,
                    thread: me,
                    holder,
                }
            );

            let recorded = sched.with_thread(me, |t| t.remove_held(self.id));
            assert_contract!(
                recorded,
                Violation::HeldLockMissing {
                    lock: self.id,
                    thread: me
                }
            );
            {
                let mut locks = self.domain.locks(&guard);
                let node = locks.node_mut(self.id);
                node.holder = None;
                node.max_requested = None;
            }
            donation::restore(self.domain, &guard, me);
            self.sema.up_locked(&guard)
        };
        if preempted {
            self.sema.yield_to_woken();
        }
    }

    /// Returns `true` if the running thread holds the lock.
    pub fn held_by_current(&self) -> bool {
        self.holder() == Some(self.domain.scheduler().current_thread())
    }

    /// Handle of this lock in the wait-for graph.
    pub fn id(&self) -> LockId {
        self.id
    }

    /// Current holder. Only a snapshot.
    pub fn holder(&self) -> Option<ThreadId> {
        let guard = self.domain.preempt();
        self.domain.locks(&guard).node(self.id).holder
    }

    /// Highest priority that requested the lock during the current holder's
    /// tenure, if any did while it was held.
    pub fn max_requested_priority(&self) -> Option<Priority> {
        let guard = self.domain.preempt();
        self.domain.locks(&guard).node(self.id).max_requested
    }

    #[track_caller]
    fn take_ownership(&self, me: ThreadId) {
        let guard = self.domain.preempt();
        let recorded = self
            .domain
            .scheduler()
            .with_thread(me, |t| t.push_held(self.id));
        if let Err(violation) = recorded {
            contract::fatal(violation);
        }
        self.domain.locks(&guard).node_mut(self.id).holder = Some(me);
    }
}

impl<S: Scheduler> Drop for Lock<'_, S> {
    fn drop(&mut self) {
        let guard = self.domain.preempt();
        let node = self.domain.locks(&guard).unregister(self.id);
        let Some(holder) = node.and_then(|node| node.holder) else {
            return;
        };
        log::warn!("synch: {} dropped while held by {holder}", self.id);
        let recorded = self
            .domain
            .scheduler()
            .with_thread(holder, |t| t.remove_held(self.id));
        if !recorded {
            log::warn!("synch: {holder} did not list {} as held", self.id);
        }
        donation::restore(self.domain, &guard, holder);
    }
}
