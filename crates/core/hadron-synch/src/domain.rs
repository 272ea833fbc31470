//! Binding between the primitives and one scheduler.
//!
//! A [`SyncDomain`] owns the scheduler handle, the configuration, and the
//! lock table: for every live [`Lock`](crate::Lock), its holder and the
//! highest priority that requested it during the current tenure. Together
//! with each thread's `waiting_on` edge this is the wait-for graph that
//! donation walks.

use alloc::collections::{BTreeMap, btree_map};

use crate::config::SyncConfig;
use crate::contract::{self, Violation};
use crate::id::{LockId, ThreadId};
use crate::sched::{PreemptGuard, Scheduler};
use crate::sync::cell::{PreemptCell, PreemptCellRef};
use crate::sync::donation;
use crate::thread::Priority;

/// Lock-side state of the wait-for graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct LockNode {
    pub(crate) holder: Option<ThreadId>,
    pub(crate) max_requested: Option<Priority>,
}

#[derive(Debug, Default)]
pub(crate) struct LockTable {
    nodes: BTreeMap<LockId, LockNode>,
    next_id: u32,
}

impl LockTable {
    /// Allocates an id no live lock uses. Ids wrap around, skipping those
    /// still registered.
    pub(crate) fn register(&mut self) -> LockId {
        loop {
            let id = LockId::new(self.next_id);
            self.next_id = self.next_id.wrapping_add(1);
            if let btree_map::Entry::Vacant(slot) = self.nodes.entry(id) {
                slot.insert(LockNode::default());
                return id;
            }
        }
    }

    pub(crate) fn unregister(&mut self, lock: LockId) -> Option<LockNode> {
        self.nodes.remove(&lock)
    }

    pub(crate) fn get(&self, lock: LockId) -> Option<&LockNode> {
        self.nodes.get(&lock)
    }

    #[track_caller]
    pub(crate) fn node(&self, lock: LockId) -> &LockNode {
        self.nodes
            .get(&lock)
            .unwrap_or_else(|| contract::fatal(Violation::UnknownLock { lock }))
    }

    #[track_caller]
    pub(crate) fn node_mut(&mut self, lock: LockId) -> &mut LockNode {
        self.nodes
            .get_mut(&lock)
            .unwrap_or_else(|| contract::fatal(Violation::UnknownLock { lock }))
    }

    /// Highest `max_requested` over `locks`, skipping locks with none.
    pub(crate) fn max_requested(&self, locks: impl Iterator<Item = LockId>) -> Option<Priority> {
        locks
            .filter_map(|lock| self.get(lock).and_then(|node| node.max_requested))
            .max()
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }
}

/// Owner of the scheduler and the lock table.
///
/// Primitives borrow their domain, so a domain outlives every semaphore,
/// lock and condition variable created from it.
pub struct SyncDomain<S: Scheduler> {
    sched: S,
    config: SyncConfig,
    locks: PreemptCell<LockTable>,
}

impl<S: Scheduler> SyncDomain<S> {
    /// Creates a domain with the default configuration.
    pub fn new(sched: S) -> Self {
        Self::with_config(sched, SyncConfig::default())
    }

    /// Creates a domain with an explicit configuration.
    pub fn with_config(sched: S, config: SyncConfig) -> Self {
        log::debug!(
            "synch: domain created (max donation depth {})",
            config.max_donation_depth()
        );
        Self {
            sched,
            config,
            locks: PreemptCell::new("lock table", LockTable::default()),
        }
    }

    /// The scheduler this domain talks to.
    pub fn scheduler(&self) -> &S {
        &self.sched
    }

    /// The domain configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Opens a protected section.
    pub fn preempt(&self) -> PreemptGuard<'_, S> {
        PreemptGuard::new(&self.sched)
    }

    /// Current effective priority of `thread`.
    pub fn priority_of(&self, thread: ThreadId) -> Priority {
        self.sched.with_thread(thread, |t| t.priority())
    }

    /// Current effective priority of the running thread.
    pub fn current_priority(&self) -> Priority {
        self.priority_of(self.sched.current_thread())
    }

    /// Sets the running thread's own priority.
    ///
    /// While the thread is donated-to, `priority` becomes its base priority
    /// and the donated level stays in effect as long as it is higher. The
    /// caller yields if its effective priority dropped, since a ready thread
    /// may now outrank it.
    pub fn set_priority(&self, priority: Priority) {
        let me = self.sched.current_thread();
        let (old, new) = {
            let guard = self.preempt();
            donation::rebase(self, &guard, me, priority)
        };
        log::debug!("synch: {me} priority {old} -> {new}");
        if new < old {
            self.sched.yield_now();
        }
    }

    /// Number of live locks created from this domain.
    pub fn lock_count(&self) -> usize {
        let guard = self.preempt();
        self.locks(&guard).len()
    }

    pub(crate) fn locks<'a>(
        &'a self,
        guard: &'a PreemptGuard<'_, S>,
    ) -> PreemptCellRef<'a, LockTable> {
        self.locks.borrow_mut(guard)
    }
}
