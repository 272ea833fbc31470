//! Priority ordering for waiter collections.
//!
//! Waiters are appended in arrival order and re-sorted by the *current*
//! effective priority of their thread right before one is picked, since a
//! donation may have changed priorities while they were queued. All sorts
//! are stable, which keeps equal-priority waiters FIFO.

use alloc::collections::VecDeque;
use core::cmp::Ordering;

use crate::id::ThreadId;
use crate::sched::Scheduler;
use crate::thread::Priority;

/// Compares two priorities so that the more urgent one sorts first.
pub(crate) fn higher_first(a: Priority, b: Priority) -> Ordering {
    b.cmp(&a)
}

/// Current effective priority of `thread`.
pub(crate) fn priority_of<S: Scheduler>(sched: &S, thread: ThreadId) -> Priority {
    sched.with_thread(thread, |t| t.priority())
}

/// Stable-sorts `queue` highest priority first, reading each entry's
/// thread through `thread_of`.
pub(crate) fn sort_by_priority<T, S: Scheduler>(
    sched: &S,
    queue: &mut VecDeque<T>,
    thread_of: impl Fn(&T) -> ThreadId,
) {
    queue
        .make_contiguous()
        .sort_by_cached_key(|entry| core::cmp::Reverse(priority_of(sched, thread_of(entry))));
}

/// Inserts `entry` behind every entry of equal or higher priority.
pub(crate) fn insert_by_priority<T, S: Scheduler>(
    sched: &S,
    queue: &mut VecDeque<T>,
    entry: T,
    thread_of: impl Fn(&T) -> ThreadId,
) {
    let priority = priority_of(sched, thread_of(&entry));
    let at = queue
        .iter()
        .position(|other| {
            higher_first(priority, priority_of(sched, thread_of(other))) == Ordering::Less
        })
        .unwrap_or(queue.len());
    queue.insert(at, entry);
}

/// Re-sorts `queue` and removes its most urgent entry.
pub(crate) fn pop_highest<T, S: Scheduler>(
    sched: &S,
    queue: &mut VecDeque<T>,
    thread_of: impl Fn(&T) -> ThreadId,
) -> Option<T> {
    sort_by_priority(sched, queue, thread_of);
    queue.pop_front()
}
