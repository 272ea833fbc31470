//! Priority donation.
//!
//! A thread about to block on a held lock lends its effective priority to
//! the holder, and on through every lock the holder is itself waiting for.
//! Releasing a lock takes back whatever that lock contributed. Each step
//! runs inside the caller's protected section.

use planck_noalloc::vec::ArrayVec;

use crate::config::MAX_DONATION_DEPTH;
use crate::contract::{self, Violation};
use crate::domain::SyncDomain;
use crate::id::{LockId, ThreadId};
use crate::sched::{PreemptGuard, Scheduler};
use crate::thread::Priority;

/// Propagates `donor`'s priority along the wait-for chain starting at `lock`.
///
/// Every lock on the chain records the donor as a requester, and every
/// holder on the chain is raised to at least the donor's priority. The walk
/// stops at a holder that is not waiting, or after the configured number of
/// hops. Meeting a thread twice means the chain is a cycle, which is a
/// deadlock and fatal.
pub(crate) fn donate<S: Scheduler>(
    domain: &SyncDomain<S>,
    guard: &PreemptGuard<'_, S>,
    lock: LockId,
    donor: ThreadId,
) {
    let sched = domain.scheduler();
    let priority = domain.priority_of(donor);
    let depth = domain.config().max_donation_depth();

    let mut visited = ArrayVec::<ThreadId, { MAX_DONATION_DEPTH + 1 }>::new();
    visited.push(donor);

    let mut lock = lock;
    for _ in 0..depth {
        let holder = {
            let mut locks = domain.locks(guard);
            let node = locks.node_mut(lock);
            node.max_requested = node.max_requested.max(Some(priority));
            node.holder
        };
        let Some(holder) = holder else {
            return;
        };
        if visited.iter().any(|&seen| seen == holder) {
            contract::fatal(Violation::WaitCycle {
                lock,
                thread: donor,
            });
        }
        visited.push(holder);

        let next = sched.with_thread(holder, |t| {
            if t.receive_donation(priority) {
                log::trace!("synch: {donor} donates {priority} to {holder} via {lock}");
            }
            t.waiting_on()
        });
        match next {
            Some(next) => lock = next,
            None => return,
        }
    }

    log::warn!("synch: donation from {donor} stopped after {depth} hops at {lock}");
}

/// Recomputes `owner`'s priority after it stopped holding a lock.
///
/// The remaining donation is the highest requester priority over the locks
/// `owner` still holds. If that does not exceed the base priority, every
/// donation is undone.
pub(crate) fn restore<S: Scheduler>(
    domain: &SyncDomain<S>,
    guard: &PreemptGuard<'_, S>,
    owner: ThreadId,
) {
    let locks = domain.locks(guard);
    let change = domain.scheduler().with_thread(owner, |t| {
        let base = t.base_priority?;
        let old = t.priority;
        match locks.max_requested(t.held_locks()) {
            Some(demanded) if demanded > base => t.priority = demanded,
            _ => {
                t.priority = base;
                t.base_priority = None;
            }
        }
        Some((old, t.priority))
    });
    if let Some((old, new)) = change {
        log::debug!("synch: {owner} restored {old} -> {new}");
    }
}

/// Makes `priority` the running thread's own priority, keeping the demand
/// of threads waiting on its locks where that is higher. Returns the old
/// and new effective priorities.
pub(crate) fn rebase<S: Scheduler>(
    domain: &SyncDomain<S>,
    guard: &PreemptGuard<'_, S>,
    thread: ThreadId,
    priority: Priority,
) -> (Priority, Priority) {
    let locks = domain.locks(guard);
    domain.scheduler().with_thread(thread, |t| {
        let old = t.priority;
        match locks.max_requested(t.held_locks()) {
            Some(level) if level > priority => {
                t.priority = level;
                t.base_priority = Some(priority);
            }
            _ => {
                t.priority = priority;
                t.base_priority = None;
            }
        }
        (old, t.priority)
    })
}

/// Hands the donations of threads still queued on `lock` to its new holder.
///
/// Called right after `holder` acquired the lock. `top_waiter` is the
/// highest effective priority still waiting on it.
pub(crate) fn inherit<S: Scheduler>(
    domain: &SyncDomain<S>,
    guard: &PreemptGuard<'_, S>,
    lock: LockId,
    holder: ThreadId,
    top_waiter: Option<Priority>,
) {
    let Some(priority) = top_waiter else {
        return;
    };
    {
        let mut locks = domain.locks(guard);
        let node = locks.node_mut(lock);
        node.max_requested = node.max_requested.max(Some(priority));
    }
    domain.scheduler().with_thread(holder, |t| {
        if t.receive_donation(priority) {
            log::trace!("synch: {holder} inherits {priority} from waiters on {lock}");
        }
    });
}
