//! Mesa-style condition variable.
//!
//! Each waiter parks on a private semaphore, so a signal delivered between
//! releasing the lock and blocking is never lost. Signals go to the waiter
//! with the highest effective priority. A woken waiter reacquires the lock
//! before returning and must recheck its condition.

use alloc::collections::VecDeque;
use alloc::sync::Arc;

use super::cell::PreemptCell;
use super::lock::Lock;
use super::order;
use super::semaphore::Semaphore;
use crate::assert_contract;
use crate::contract::Violation;
use crate::domain::SyncDomain;
use crate::id::ThreadId;
use crate::sched::Scheduler;

struct Waiter<'d, S: Scheduler> {
    sema: Arc<Semaphore<'d, S>>,
    thread: ThreadId,
}

/// A condition variable used together with a [`Lock`].
pub struct Condvar<'d, S: Scheduler> {
    domain: &'d SyncDomain<S>,
    waiters: PreemptCell<VecDeque<Waiter<'d, S>>>,
}

impl<'d, S: Scheduler> Condvar<'d, S> {
    /// Creates a condition variable with no waiters.
    pub fn new(domain: &'d SyncDomain<S>) -> Self {
        Self {
            domain,
            waiters: PreemptCell::new("condvar", VecDeque::new()),
        }
    }

    /// Atomically releases `lock` and waits for a signal, then reacquires
    /// `lock` before returning.
    ///
    /// # Panics
    ///
    /// Fatal from interrupt context or if the caller does not hold `lock`.
    #[track_caller]
    pub fn wait(&self, lock: &Lock<'d, S>) {
        let sched = self.domain.scheduler();
        assert_contract!(
            !sched.in_interrupt_context(),
            Violation::InterruptContext {
                operation: "Condvar::wait"
            }
        );
        let me = self.check_holder(lock);

        let sema = Arc::new(Semaphore::new(self.domain, 0));
        {
            let guard = self.domain.preempt();
            let mut waiters = self.waiters.borrow_mut(&guard);
            let waiter = Waiter {
                sema: Arc::clone(&sema),
                thread: me,
            };
            order::insert_by_priority(sched, &mut *waiters, waiter, |w| w.thread);
        }

        lock.release();
        sema.down();
        lock.acquire();
    }

    /// Wakes the most urgent waiter, if any.
    ///
    /// # Panics
    ///
    /// Fatal if the caller does not hold `lock`.
    #[track_caller]
    pub fn signal(&self, lock: &Lock<'d, S>) {
        self.check_holder(lock);
        let Some((sema, preempted)) = self.wake_one() else {
            return;
        };
        if preempted {
            sema.yield_to_woken();
        }
    }

    /// Wakes every waiter.
    ///
    /// # Panics
    ///
    /// Fatal if the caller does not hold `lock`.
    #[track_caller]
    pub fn broadcast(&self, lock: &Lock<'d, S>) {
        self.check_holder(lock);
        while self.waiter_count() > 0 {
            self.signal(lock);
        }
    }

    /// Pops the most urgent waiter and readies it in one protected section.
    fn wake_one(&self) -> Option<(Arc<Semaphore<'d, S>>, bool)> {
        let guard = self.domain.preempt();
        let waiter = {
            let mut waiters = self.waiters.borrow_mut(&guard);
            order::pop_highest(self.domain.scheduler(), &mut *waiters, |w| w.thread)
        }?;
        log::trace!("synch: condvar signals {}", waiter.thread);
        let preempted = waiter.sema.up_locked(&guard);
        Some((waiter.sema, preempted))
    }

    /// Number of threads waiting. Only a snapshot.
    pub fn waiter_count(&self) -> usize {
        let guard = self.domain.preempt();
        self.waiters.borrow_mut(&guard).len()
    }

    #[track_caller]
    fn check_holder(&self, lock: &Lock<'d, S>) -> ThreadId {
        let me = self.domain.scheduler().current_thread();
        assert_contract!(
            lock.held_by_current(),
            Violation::LockNotHeld {
                lock: lock.id(),
                thread: me
            }
        );
        me
    }
}
