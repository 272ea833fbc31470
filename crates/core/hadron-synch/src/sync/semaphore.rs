//! Counting semaphore with priority-ordered wakeup.

use alloc::collections::VecDeque;

use super::cell::PreemptCell;
use super::order;
use crate::assert_contract;
use crate::contract::{self, Violation};
use crate::domain::SyncDomain;
use crate::id::ThreadId;
use crate::sched::{PreemptGuard, Scheduler};
use crate::thread::Priority;

struct SemaState {
    value: u32,
    waiters: VecDeque<ThreadId>,
}

/// A counting semaphore.
///
/// [`down`](Self::down) blocks while no permit is available.
/// [`up`](Self::up) returns a permit and wakes the waiter with the highest
/// effective priority at that moment, FIFO among equals. If the woken thread
/// outranks the caller, the caller yields to it.
pub struct Semaphore<'d, S: Scheduler> {
    domain: &'d SyncDomain<S>,
    state: PreemptCell<SemaState>,
}

impl<'d, S: Scheduler> Semaphore<'d, S> {
    /// Creates a semaphore holding `value` permits.
    pub fn new(domain: &'d SyncDomain<S>, value: u32) -> Self {
        Self {
            domain,
            state: PreemptCell::new(
                "semaphore",
                SemaState {
                    value,
                    waiters: VecDeque::new(),
                },
            ),
        }
    }

    /// Takes a permit, blocking until one is available.
    ///
    /// # Panics
    ///
    /// Fatal when called from interrupt context.
    #[track_caller]
    pub fn down(&self) {
        let sched = self.domain.scheduler();
        assert_contract!(
            !sched.in_interrupt_context(),
            Violation::InterruptContext {
                operation: "Semaphore::down"
            }
        );

        let guard = self.domain.preempt();
        let me = sched.current_thread();
        loop {
            {
                let mut state = self.state.borrow_mut(&guard);
                if state.value > 0 {
                    state.value -= 1;
                    return;
                }
                state.waiters.push_back(me);
            }
            log::trace!("synch: {me} waits on semaphore");
            sched.block();
        }
    }

    /// Takes a permit if one is available. Never blocks, so it is usable
    /// from interrupt context.
    pub fn try_down(&self) -> bool {
        let guard = self.domain.preempt();
        let mut state = self.state.borrow_mut(&guard);
        if state.value > 0 {
            state.value -= 1;
            true
        } else {
            false
        }
    }

    /// Returns a permit and wakes the most urgent waiter, if any.
    ///
    /// # Panics
    ///
    /// Fatal if the count would overflow.
    #[track_caller]
    pub fn up(&self) {
        let preempted = {
            let guard = self.domain.preempt();
            self.up_locked(&guard)
        };
        if preempted {
            self.yield_to_woken();
        }
    }

    /// Returns a permit and readies the most urgent waiter inside the
    /// caller's protected section.
    ///
    /// Returns `true` if the woken thread outranks the caller, which must
    /// then call [`yield_to_woken`](Self::yield_to_woken) once the section
    /// ends.
    #[track_caller]
    pub(crate) fn up_locked(&self, guard: &PreemptGuard<'_, S>) -> bool {
        let sched = self.domain.scheduler();
        let woken = {
            let mut state = self.state.borrow_mut(guard);
            let Some(value) = state.value.checked_add(1) else {
                contract::fatal(Violation::SemaphoreOverflow);
            };
            state.value = value;
            order::pop_highest(sched, &mut state.waiters, |&t| t)
        };
        woken.is_some_and(|thread| {
            sched.unblock(thread);
            let woken_priority = order::priority_of(sched, thread);
            log::trace!("synch: semaphore wakes {thread} at priority {woken_priority}");
            woken_priority > order::priority_of(sched, sched.current_thread())
        })
    }

    /// Gives the processor to a more urgent thread readied by
    /// [`up_locked`](Self::up_locked). From an interrupt handler the yield
    /// is deferred until the handler returns.
    pub(crate) fn yield_to_woken(&self) {
        let sched = self.domain.scheduler();
        if sched.in_interrupt_context() {
            sched.yield_on_return();
        } else {
            sched.yield_now();
        }
    }

    /// Number of available permits. Only a snapshot.
    pub fn value(&self) -> u32 {
        let guard = self.domain.preempt();
        self.state.borrow_mut(&guard).value
    }

    /// Number of threads blocked in [`down`](Self::down). Only a snapshot.
    pub fn waiter_count(&self) -> usize {
        let guard = self.domain.preempt();
        self.state.borrow_mut(&guard).waiters.len()
    }

    /// Highest effective priority among the current waiters.
    pub(crate) fn top_waiter_priority(&self, guard: &PreemptGuard<'_, S>) -> Option<Priority> {
        let sched = self.domain.scheduler();
        let state = self.state.borrow_mut(guard);
        state
            .waiters
            .iter()
            .map(|&t| order::priority_of(sched, t))
            .max()
    }
}
