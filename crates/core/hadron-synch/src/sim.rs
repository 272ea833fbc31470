//! Deterministic uniprocessor scheduler for host tests.
//!
//! Every simulated thread is backed by an OS thread, but only the thread
//! named by `running` makes progress; the others wait on a condition
//! variable until they are switched to. Switching always picks the
//! highest-priority ready thread, FIFO among equals, reading the live
//! priority from each thread's [`ThreadSynch`] so donations take effect.
//!
//! The test's own thread is simulated thread 0.

use std::collections::VecDeque;
use std::sync::{Condvar as StdCondvar, Mutex as StdMutex, MutexGuard, PoisonError};
use std::thread::Scope;

use crate::id::ThreadId;
use crate::sched::{PreemptState, Scheduler};
use crate::thread::{Priority, ThreadSynch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Running,
    Ready,
    Blocked,
    Joining,
    Exited,
}

struct SimThread {
    name: &'static str,
    synch: ThreadSynch,
    run: RunState,
    /// Preemption state saved while switched out.
    preempt_enabled: bool,
    spawned: bool,
}

struct SimState {
    threads: Vec<SimThread>,
    ready: VecDeque<ThreadId>,
    running: ThreadId,
    preempt_enabled: bool,
    in_interrupt: bool,
    yield_requested: bool,
    poisoned: bool,
}

impl SimState {
    fn thread(&mut self, id: ThreadId) -> &mut SimThread {
        &mut self.threads[id.as_u32() as usize]
    }

    fn priority(&self, id: ThreadId) -> Priority {
        self.threads[id.as_u32() as usize].synch.priority()
    }

    fn add(&mut self, name: &'static str, priority: Priority, run: RunState) -> ThreadId {
        let id = ThreadId::new(u32::try_from(self.threads.len()).unwrap());
        self.threads.push(SimThread {
            name,
            synch: ThreadSynch::new(priority),
            run,
            preempt_enabled: true,
            spawned: false,
        });
        id
    }

    fn make_ready(&mut self, id: ThreadId) {
        self.thread(id).run = RunState::Ready;
        self.ready.push_back(id);
    }

    /// Removes the most urgent ready thread, FIFO among equals.
    fn pick_next(&mut self) -> Option<ThreadId> {
        let best = self
            .ready
            .iter()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| {
                self.priority(**a)
                    .cmp(&self.priority(**b))
                    .then_with(|| ib.cmp(ia))
            })
            .map(|(index, _)| index)?;
        self.ready.remove(best)
    }

    fn higher_ready_than(&self, id: ThreadId) -> bool {
        let mine = self.priority(id);
        self.ready.iter().any(|&other| self.priority(other) > mine)
    }
}

/// Simulated uniprocessor.
pub(crate) struct SimScheduler {
    state: StdMutex<SimState>,
    turn: StdCondvar,
    preempt_on_restore: bool,
}

impl SimScheduler {
    pub(crate) fn new() -> Self {
        let mut state = SimState {
            threads: Vec::new(),
            ready: VecDeque::new(),
            running: ThreadId::new(0),
            preempt_enabled: true,
            in_interrupt: false,
            yield_requested: false,
            poisoned: false,
        };
        state.add("main", Priority::DEFAULT, RunState::Running);
        Self {
            state: StdMutex::new(state),
            turn: StdCondvar::new(),
            preempt_on_restore: false,
        }
    }

    /// Sets the priority of the test's own thread.
    pub(crate) fn with_main_priority(self, priority: Priority) -> Self {
        self.lock().thread(ThreadId::new(0)).synch = ThreadSynch::new(priority);
        self
    }

    /// Re-enabling preemption yields to a higher-priority ready thread, like
    /// a timer interrupt that was held off during the protected section.
    pub(crate) fn with_preempt_on_restore(mut self) -> Self {
        self.preempt_on_restore = true;
        self
    }

    /// Adds a thread record that never runs.
    pub(crate) fn register(&self, priority: Priority) -> ThreadId {
        self.lock().add("parked", priority, RunState::Blocked)
    }

    pub(crate) fn preemption_enabled(&self) -> bool {
        self.lock().preempt_enabled
    }

    /// Runs `f` as the body of the test. When `f` returns, the test thread
    /// waits for every spawned thread to exit.
    pub(crate) fn scope<'env, F>(&'env self, f: F)
    where
        F: for<'scope> FnOnce(&'scope Scope<'scope, 'env>),
    {
        std::thread::scope(|s| {
            let _poison = PoisonOnUnwind(self);
            f(s);
            self.join_all();
        });
    }

    /// Creates a ready thread. If it outranks the creator, the creator
    /// yields to it immediately.
    pub(crate) fn spawn<'scope, 'env, F>(
        &'env self,
        scope: &'scope Scope<'scope, 'env>,
        name: &'static str,
        priority: Priority,
        f: F,
    ) -> ThreadId
    where
        F: FnOnce() + Send + 'scope,
    {
        let id = {
            let mut state = self.lock();
            let id = state.add(name, priority, RunState::Ready);
            state.thread(id).spawned = true;
            state.ready.push_back(id);
            id
        };
        std::thread::Builder::new()
            .name(name.into())
            .spawn_scoped(scope, move || {
                drop(self.wait_turn(self.lock(), id));
                let _poison = PoisonOnUnwind(self);
                f();
                self.exit_current();
            })
            .unwrap();

        let current = self.current_thread();
        if priority > self.with_thread(current, |t| t.priority()) {
            self.yield_now();
        }
        id
    }

    /// Runs `f` as an interrupt handler on top of the running thread.
    pub(crate) fn interrupt<R>(&self, f: impl FnOnce() -> R) -> R {
        let previous = self.disable_preemption();
        self.lock().in_interrupt = true;
        let result = f();
        let yield_requested = {
            let mut state = self.lock();
            state.in_interrupt = false;
            core::mem::take(&mut state.yield_requested)
        };
        self.restore_preemption(previous);
        if yield_requested {
            self.yield_now();
        }
        result
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_turn<'a>(
        &'a self,
        mut state: MutexGuard<'a, SimState>,
        me: ThreadId,
    ) -> MutexGuard<'a, SimState> {
        while state.running != me {
            if state.poisoned {
                drop(state);
                panic!("simulation poisoned by a panic in another thread");
            }
            state = self.turn.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        state
    }

    /// Switches away from `me`, whose run state the caller already set, and
    /// returns once `me` runs again. Returns immediately if `me` exited.
    fn reschedule<'a>(
        &'a self,
        mut state: MutexGuard<'a, SimState>,
        me: ThreadId,
    ) -> MutexGuard<'a, SimState> {
        let Some(next) = state.pick_next() else {
            state.poisoned = true;
            let stuck: Vec<_> = state
                .threads
                .iter()
                .filter(|t| t.run == RunState::Blocked && t.spawned)
                .map(|t| t.name)
                .collect();
            drop(state);
            self.turn.notify_all();
            panic!("deadlock: no runnable thread, blocked: {stuck:?}");
        };

        let saved = state.preempt_enabled;
        state.thread(me).preempt_enabled = saved;
        state.running = next;
        state.thread(next).run = RunState::Running;
        let restored = state.thread(next).preempt_enabled;
        state.preempt_enabled = restored;
        if next == me {
            return state;
        }
        self.turn.notify_all();
        if state.thread(me).run == RunState::Exited {
            return state;
        }
        self.wait_turn(state, me)
    }

    fn join_all(&self) {
        let mut state = self.lock();
        let me = state.running;
        while state
            .threads
            .iter()
            .any(|t| t.spawned && t.run != RunState::Exited)
        {
            state.thread(me).run = RunState::Joining;
            state = self.reschedule(state, me);
        }
    }

    fn exit_current(&self) {
        let mut state = self.lock();
        let me = state.running;
        state.thread(me).run = RunState::Exited;
        let joining: Vec<_> = (0..state.threads.len())
            .map(|i| ThreadId::new(u32::try_from(i).unwrap()))
            .filter(|&id| state.threads[id.as_u32() as usize].run == RunState::Joining)
            .collect();
        for id in joining {
            state.make_ready(id);
        }
        drop(self.reschedule(state, me));
    }
}

impl Scheduler for SimScheduler {
    fn current_thread(&self) -> ThreadId {
        self.lock().running
    }

    fn block(&self) {
        let mut state = self.lock();
        assert!(!state.preempt_enabled, "block() with preemption enabled");
        assert!(!state.in_interrupt, "block() in interrupt context");
        let me = state.running;
        state.thread(me).run = RunState::Blocked;
        drop(self.reschedule(state, me));
    }

    fn unblock(&self, thread: ThreadId) {
        let mut state = self.lock();
        assert_eq!(state.thread(thread).run, RunState::Blocked, "unblock of a non-blocked thread");
        state.make_ready(thread);
    }

    fn yield_now(&self) {
        let mut state = self.lock();
        assert!(!state.in_interrupt, "yield_now() in interrupt context");
        let me = state.running;
        state.make_ready(me);
        drop(self.reschedule(state, me));
    }

    fn disable_preemption(&self) -> PreemptState {
        let mut state = self.lock();
        let previous = PreemptState::new(state.preempt_enabled);
        state.preempt_enabled = false;
        previous
    }

    fn restore_preemption(&self, previous: PreemptState) {
        let mut state = self.lock();
        state.preempt_enabled = previous.was_enabled();
        let me = state.running;
        if self.preempt_on_restore
            && previous.was_enabled()
            && !state.in_interrupt
            && !state.poisoned
            && !std::thread::panicking()
            && state.higher_ready_than(me)
        {
            state.make_ready(me);
            drop(self.reschedule(state, me));
        }
    }

    fn in_interrupt_context(&self) -> bool {
        self.lock().in_interrupt
    }

    fn yield_on_return(&self) {
        self.lock().yield_requested = true;
    }

    fn with_thread<R>(&self, thread: ThreadId, f: impl FnOnce(&mut ThreadSynch) -> R) -> R {
        f(&mut self.lock().thread(thread).synch)
    }
}

/// Runs `scenario` on a scheduler that only switches at explicit yields,
/// then on one that also preempts whenever preemption is re-enabled.
pub(crate) fn each_mode(mut scenario: impl FnMut(SimScheduler)) {
    scenario(SimScheduler::new());
    scenario(SimScheduler::new().with_preempt_on_restore());
}

/// Wakes every waiting thread with a poisoned simulation if the owner
/// unwinds, so that `thread::scope` can finish joining.
struct PoisonOnUnwind<'a>(&'a SimScheduler);

impl Drop for PoisonOnUnwind<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.lock().poisoned = true;
            self.0.turn.notify_all();
        }
    }
}

/// Ordered record of events, for asserting on interleavings.
#[derive(Default)]
pub(crate) struct Journal(StdMutex<Vec<&'static str>>);

impl Journal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, event: &'static str) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    pub(crate) fn events(&self) -> Vec<&'static str> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SyncDomain;
    use crate::sched::PreemptGuard;
    use crate::sync::Semaphore;

    #[test]
    fn spawn_higher_runs_first() {
        let sched = SimScheduler::new();
        let journal = Journal::new();
        sched.scope(|s| {
            sched.spawn(s, "high", Priority::new(40), || journal.record("high"));
            journal.record("main");
            sched.spawn(s, "low", Priority::new(10), || journal.record("low"));
            journal.record("main again");
        });
        assert_eq!(journal.events(), ["high", "main", "main again", "low"]);
    }

    #[test]
    fn equal_priority_is_fifo() {
        let sched = SimScheduler::new();
        let journal = Journal::new();
        sched.scope(|s| {
            for name in ["a", "b", "c"] {
                let journal = &journal;
                sched.spawn(s, name, Priority::DEFAULT, move || journal.record(name));
            }
        });
        assert_eq!(journal.events(), ["a", "b", "c"]);
    }

    #[test]
    #[should_panic(expected = "deadlock")]
    fn deadlock_is_reported() {
        let domain = SyncDomain::new(SimScheduler::new());
        let sema = Semaphore::new(&domain, 0);
        sema.down();
    }

    fn unblock_under_guard(sched: SimScheduler) -> Vec<&'static str> {
        let sched = sched.with_main_priority(Priority::new(20));
        let journal = Journal::new();
        sched.scope(|s| {
            let high = sched.spawn(s, "high", Priority::new(30), || {
                let _guard = PreemptGuard::new(&sched);
                sched.block();
                journal.record("high");
            });
            {
                let _guard = PreemptGuard::new(&sched);
                sched.unblock(high);
                journal.record("unblocked");
            }
            journal.record("main");
        });
        journal.events()
    }

    #[test]
    fn restore_preempts_when_enabled() {
        assert_eq!(
            unblock_under_guard(SimScheduler::new().with_preempt_on_restore()),
            ["unblocked", "high", "main"]
        );
    }

    #[test]
    fn restore_does_not_preempt_by_default() {
        assert_eq!(
            unblock_under_guard(SimScheduler::new()),
            ["unblocked", "main", "high"]
        );
    }
}
