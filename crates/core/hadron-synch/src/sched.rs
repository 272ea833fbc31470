//! The scheduler interface consumed by the synchronization core.
//!
//! The core never touches the run queue or switches contexts itself. It
//! asks the scheduler to block, unblock and yield threads, and it masks
//! preemption through a scoped [`PreemptGuard`] whenever it mutates shared
//! state.

use core::marker::PhantomData;

use crate::id::ThreadId;
use crate::thread::ThreadSynch;

/// Saved preemption state, returned by [`Scheduler::disable_preemption`]
/// and handed back to [`Scheduler::restore_preemption`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct PreemptState(bool);

impl PreemptState {
    /// Records whether preemption was enabled before masking.
    pub const fn new(was_enabled: bool) -> Self {
        Self(was_enabled)
    }

    /// Returns `true` if preemption was enabled before masking.
    pub const fn was_enabled(self) -> bool {
        self.0
    }
}

/// Services a kernel scheduler provides to the synchronization core.
///
/// The core assumes a single logical execution context: at most one thread
/// runs at a time, and masking preemption makes a sequence of operations
/// atomic with respect to every other thread and to interrupt handlers.
pub trait Scheduler: Sync {
    /// Returns the id of the running thread.
    fn current_thread(&self) -> ThreadId;

    /// Blocks the running thread until another thread calls
    /// [`unblock`](Self::unblock) on it, then returns once it is scheduled
    /// again.
    ///
    /// Always called with preemption masked. The scheduler switches away
    /// regardless and re-establishes the caller's masked state when it
    /// resumes.
    fn block(&self);

    /// Moves a blocked thread to the ready state without switching to it.
    fn unblock(&self, thread: ThreadId);

    /// Gives up the processor. The caller stays ready.
    fn yield_now(&self);

    /// Masks preemption and interrupts, returning the previous state.
    ///
    /// Must be reentrant: nested calls each return the state they found.
    fn disable_preemption(&self) -> PreemptState;

    /// Restores a state returned by [`disable_preemption`](Self::disable_preemption).
    fn restore_preemption(&self, state: PreemptState);

    /// Returns `true` while an interrupt handler is running.
    fn in_interrupt_context(&self) -> bool;

    /// Asks for a yield as soon as the current interrupt handler returns.
    fn yield_on_return(&self) {}

    /// Runs `f` on the synchronization record of `thread`.
    fn with_thread<R>(&self, thread: ThreadId, f: impl FnOnce(&mut ThreadSynch) -> R) -> R;
}

/// RAII guard for a protected section.
///
/// Preemption is masked while the guard lives and restored to its previous
/// state on drop. Guards nest. The guard is `!Send`: it describes the
/// processor state of the thread that created it.
pub struct PreemptGuard<'a, S: Scheduler> {
    sched: &'a S,
    previous: PreemptState,
    _not_send: PhantomData<*const ()>,
}

impl<'a, S: Scheduler> PreemptGuard<'a, S> {
    /// Masks preemption on `sched`.
    pub fn new(sched: &'a S) -> Self {
        let previous = sched.disable_preemption();
        Self {
            sched,
            previous,
            _not_send: PhantomData,
        }
    }

    /// The scheduler this guard masks.
    pub fn scheduler(&self) -> &'a S {
        self.sched
    }

    /// Returns `true` if this is the outermost guard, i.e. dropping it
    /// re-enables preemption.
    pub fn is_outermost(&self) -> bool {
        self.previous.was_enabled()
    }
}

impl<S: Scheduler> Drop for PreemptGuard<'_, S> {
    fn drop(&mut self) {
        self.sched.restore_preemption(self.previous);
    }
}
