//! Cooperative coroutine scheduler
//!
//! One scheduler drives one OS thread. Coroutines run until they suspend
//! or finish; nothing preempts them.
//!
//! # Pools
//!
//! ```text
//!   dispatch ──► idle slot ──► active queue ──► running
//!                   ▲              ▲   ▲            │
//!                   │  finish      │   │ wake       │ suspend_for
//!                   └──────────────┼───┴── suspended (timer index)
//!                                  │ timeout
//! ```
//!
//! Every live coroutine is in exactly one of idle, active, suspended or
//! running. Slots and stacks are reused; capacity is fixed by
//! `max_coroutines`.
//!
//! # Cycle
//!
//! `tick()` wakes expired timers, runs the active queue to empty, waits on
//! the `WaitPolicy` for at most the time to the next deadline, then runs
//! whatever the wait woke.
//!
//! The state lives in a `RefCell` that is never borrowed across a context
//! switch.

use std::cell::{RefCell, UnsafeCell};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Duration;

use cosched_core::constants::SLOT_NONE;
use cosched_core::kprint;
use cosched_core::{kdebug, kerror, ktrace, kwarn};
use cosched_core::{CoroHandle, CoroId, CoroState, SchedError, SchedResult, TimerError, WakeReason};

use crate::arch::{self, Context};
use crate::config::RuntimeConfig;
use crate::memory::Stack;
use crate::timer::{self, TimerIndex};
use crate::tls;

/// How the scheduler blocks when no coroutine is active.
pub trait WaitPolicy {
    /// Block for at most `timeout_ms`, waking any coroutine whose
    /// condition arrived meanwhile. Zero means poll without blocking.
    fn wait(&self, timeout_ms: u64);
}

/// Plain sleep; used when no event loop is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct SleepWait;

impl WaitPolicy for SleepWait {
    fn wait(&self, timeout_ms: u64) {
        if timeout_ms > 0 {
            std::thread::sleep(Duration::from_millis(timeout_ms));
        }
    }
}

impl<T: WaitPolicy + ?Sized> WaitPolicy for Rc<T> {
    fn wait(&self, timeout_ms: u64) {
        (**self).wait(timeout_ms)
    }
}

type Entry = Box<dyn FnOnce() + 'static>;

/// Per-slot record. The stack stays mapped while the slot is idle.
struct Coroutine {
    id: CoroId,
    stack: Stack,
    entry: Option<Entry>,
    state: CoroState,
    /// Deadline the coroutine is indexed under while suspended
    wake_at: u64,
    reason: WakeReason,
}

struct SchedState {
    coros: Vec<Coroutine>,
    idle: VecDeque<u32>,
    active: VecDeque<u32>,
    /// Suspended without a timer node; rejoin `active` after the run loop
    deferred: Vec<u32>,
    timers: TimerIndex<CoroHandle>,
    expired: Vec<CoroHandle>,
    current: u32,
    next_id: u64,
    stacks_allocated: u64,
}

impl SchedState {
    #[inline]
    fn handle(&self, slot: u32) -> CoroHandle {
        CoroHandle::new(self.coros[slot as usize].id, slot)
    }
}

/// Pool sizes at one instant.
///
/// `total == idle + active + suspended + running` always holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub total: usize,
    pub idle: usize,
    pub active: usize,
    pub suspended: usize,
    pub running: usize,
    /// Stacks ever mapped by this scheduler
    pub stacks_allocated: u64,
}

/// Single-threaded coroutine scheduler.
pub struct Scheduler {
    max_coroutines: usize,
    stack_size: usize,
    idle_wait_ms: u64,
    state: RefCell<SchedState>,
    main_ctx: UnsafeCell<Context>,
    contexts: Box<[UnsafeCell<Context>]>,
    policy: Box<dyn WaitPolicy>,
}

impl Scheduler {
    /// Scheduler that sleeps when idle.
    pub fn new(config: &RuntimeConfig) -> SchedResult<Self> {
        Self::with_policy(config, Box::new(SleepWait))
    }

    /// Scheduler that blocks through `policy` when idle.
    pub fn with_policy(config: &RuntimeConfig, policy: Box<dyn WaitPolicy>) -> SchedResult<Self> {
        config.validate()?;

        let max = config.max_coroutines;
        let contexts = (0..max).map(|_| UnsafeCell::new(Context::new())).collect();

        kdebug!(
            "scheduler: max_coroutines={} stack_size={} timer_nodes={}",
            max,
            config.aligned_stack_size(),
            config.effective_timer_nodes()
        );

        Ok(Self {
            max_coroutines: max,
            stack_size: config.aligned_stack_size(),
            idle_wait_ms: config.idle_wait.as_millis() as u64,
            state: RefCell::new(SchedState {
                coros: Vec::with_capacity(max),
                idle: VecDeque::with_capacity(max),
                active: VecDeque::with_capacity(max),
                deferred: Vec::new(),
                timers: TimerIndex::new(config.effective_timer_nodes()),
                expired: Vec::new(),
                current: SLOT_NONE,
                next_id: 0,
                stacks_allocated: 0,
            }),
            main_ctx: UnsafeCell::new(Context::new()),
            contexts,
            policy,
        })
    }

    /// Queue `f` to run as a new coroutine.
    ///
    /// Reuses an idle slot and its stack when one exists, otherwise maps a
    /// new stack. At capacity the call fails with `SchedError::Busy` and
    /// nothing is allocated; the caller is expected to shed the work.
    pub fn dispatch<F>(&self, f: F) -> SchedResult<CoroHandle>
    where
        F: FnOnce() + 'static,
    {
        let mut st = self.state.borrow_mut();

        let slot = match st.idle.pop_front() {
            Some(slot) => slot,
            None if st.coros.len() < self.max_coroutines => {
                let stack = Stack::allocate(self.stack_size)?;
                st.stacks_allocated += 1;
                st.coros.push(Coroutine {
                    id: CoroId::BOOTSTRAP,
                    stack,
                    entry: None,
                    state: CoroState::Idle,
                    wake_at: 0,
                    reason: WakeReason::Unset,
                });
                (st.coros.len() - 1) as u32
            }
            None => {
                kwarn!("dispatch rejected: {} coroutines live", self.max_coroutines);
                return Err(SchedError::Busy);
            }
        };

        st.next_id += 1;
        let id = CoroId::new(st.next_id);
        let coro = &mut st.coros[slot as usize];
        coro.id = id;
        coro.entry = Some(Box::new(f));
        coro.state = CoroState::Active;
        coro.wake_at = 0;
        coro.reason = WakeReason::Unset;
        let top = coro.stack.top();

        // SAFETY: the slot is idle, so nothing is executing on its stack.
        unsafe {
            arch::init_context(self.contexts[slot as usize].get(), top, coroutine_main, slot as usize);
        }
        st.active.push_back(slot);

        ktrace!("dispatched {} on slot {}", id, slot);
        Ok(CoroHandle::new(id, slot))
    }

    /// Suspend the running coroutine until woken or until `timeout_ms`
    /// elapses.
    ///
    /// Called from the bootstrap context this fails with
    /// `SchedError::NotInCoroutine`. If the timer pool has no node for a
    /// new deadline the coroutine is not indexed; it is requeued as active
    /// once the current run loop drains and resumes early, with
    /// `woke_by_timeout()` false.
    pub fn suspend_for(&self, timeout_ms: u64) -> SchedResult<()> {
        let slot = {
            let mut st = self.state.borrow_mut();
            let slot = st.current;
            if slot == SLOT_NONE {
                return Err(SchedError::NotInCoroutine);
            }

            let handle = st.handle(slot);
            let deadline = timer::deadline_after(timeout_ms);
            let st = &mut *st;
            let coro = &mut st.coros[slot as usize];
            coro.reason = WakeReason::Unset;

            match st.timers.insert(handle, deadline) {
                Ok(()) => {
                    coro.state = CoroState::Suspended;
                    coro.wake_at = deadline;
                }
                Err(TimerError::PoolExhausted) => {
                    kwarn!("timer pool exhausted, {} requeued without a deadline", handle.id());
                    coro.state = CoroState::Active;
                    st.deferred.push(slot);
                }
            }
            st.current = SLOT_NONE;
            slot
        };

        kprint::clear_coro_id();
        // SAFETY: `slot` is the running coroutine, so its context cell is
        // ours to write; the main context was saved when it was resumed.
        unsafe {
            arch::context_switch(self.contexts[slot as usize].get(), self.main_ctx.get());
        }
        Ok(())
    }

    /// Whether the running coroutine's last suspension ended by timeout.
    ///
    /// Consumes the flag: a second call reports `false` until the next
    /// suspension. Always `false` on the bootstrap context.
    pub fn woke_by_timeout(&self) -> bool {
        let mut st = self.state.borrow_mut();
        let slot = st.current;
        if slot == SLOT_NONE {
            return false;
        }
        let coro = &mut st.coros[slot as usize];
        std::mem::take(&mut coro.reason).is_timeout()
    }

    /// Move a suspended coroutine to the tail of the active queue.
    ///
    /// Returns false, doing nothing, when the handle is stale or the
    /// coroutine is not suspended.
    pub fn wake(&self, handle: CoroHandle) -> bool {
        self.reactivate(handle, false)
    }

    /// Like `wake`, but the coroutine goes to the head of the active queue
    /// and runs before every normally woken one.
    pub fn wake_priority(&self, handle: CoroHandle) -> bool {
        self.reactivate(handle, true)
    }

    fn reactivate(&self, handle: CoroHandle, front: bool) -> bool {
        let mut st = self.state.borrow_mut();
        let st = &mut *st;

        let Some(coro) = st.coros.get_mut(handle.index()) else {
            ktrace!("wake ignored: {:?} out of range", handle);
            return false;
        };
        if coro.id != handle.id() || !coro.state.is_wakeable() {
            ktrace!("wake ignored: {:?} is {:?}", handle, coro.state);
            return false;
        }

        if !st.timers.remove(handle, coro.wake_at) {
            ktrace!("{:?} was not indexed at {}", handle, coro.wake_at);
        }
        coro.state = CoroState::Active;
        coro.reason = WakeReason::Explicit;
        if front {
            st.active.push_front(handle.slot());
        } else {
            st.active.push_back(handle.slot());
        }
        true
    }

    /// Handle of the running coroutine, `None` on the bootstrap context.
    pub fn current(&self) -> Option<CoroHandle> {
        let st = self.state.borrow();
        if st.current == SLOT_NONE {
            None
        } else {
            Some(st.handle(st.current))
        }
    }

    /// Snapshot of the pool sizes.
    pub fn stats(&self) -> Stats {
        let st = self.state.borrow();
        let suspended = st
            .coros
            .iter()
            .filter(|c| c.state == CoroState::Suspended)
            .count();
        Stats {
            total: st.coros.len(),
            idle: st.idle.len(),
            active: st.active.len() + st.deferred.len(),
            suspended,
            running: usize::from(st.current != SLOT_NONE),
            stacks_allocated: st.stacks_allocated,
        }
    }

    /// Whether no coroutine is active or suspended.
    pub fn is_quiescent(&self) -> bool {
        let st = self.state.borrow();
        st.active.is_empty() && st.deferred.is_empty() && st.timers.is_empty()
    }

    /// One scheduling iteration.
    ///
    /// Must be called from the bootstrap context.
    pub fn tick(&self) {
        self.step(false);
    }

    /// Drive until every coroutine has finished.
    pub fn run_until_idle(&self) {
        while !self.is_quiescent() {
            self.step(true);
        }
    }

    /// With `stop_when_idle`, an iteration that leaves nothing active or
    /// suspended returns before waiting.
    pub(crate) fn step(&self, stop_when_idle: bool) {
        let _guard = tls::enter_scheduler(self);
        self.wake_expired();
        self.run_active();
        if stop_when_idle && self.is_quiescent() {
            return;
        }
        self.policy.wait(self.next_wait_ms());
        self.wake_expired();
        self.run_active();
    }

    /// Drive forever.
    pub fn run_cycle(&self) -> ! {
        loop {
            self.tick();
        }
    }

    fn next_wait_ms(&self) -> u64 {
        let st = self.state.borrow();
        if !st.active.is_empty() || !st.deferred.is_empty() {
            return 0;
        }
        match st.timers.earliest() {
            Some(deadline) => deadline.saturating_sub(timer::now_ms()),
            None => self.idle_wait_ms,
        }
    }

    fn wake_expired(&self) {
        let mut st = self.state.borrow_mut();
        let st = &mut *st;
        let now = timer::now_ms();

        st.expired.clear();
        if st.timers.drain_expired_into(now, &mut st.expired) == 0 {
            return;
        }
        for handle in st.expired.drain(..) {
            let coro = &mut st.coros[handle.index()];
            coro.state = CoroState::Active;
            coro.reason = WakeReason::Timeout;
            st.active.push_back(handle.slot());
        }
    }

    /// Resume active coroutines, head first, until the queue is empty.
    fn run_active(&self) {
        loop {
            let (slot, id) = {
                let mut st = self.state.borrow_mut();
                let Some(slot) = st.active.pop_front() else {
                    break;
                };
                st.current = slot;
                let coro = &mut st.coros[slot as usize];
                coro.state = CoroState::Running;
                (slot, coro.id)
            };

            kprint::set_coro_id(id.as_u64());
            // SAFETY: the slot was active, so its context holds either a
            // fresh frame from `init_context` or a suspended one.
            unsafe {
                arch::context_switch(self.main_ctx.get(), self.contexts[slot as usize].get());
            }
            kprint::clear_coro_id();
        }

        let mut st = self.state.borrow_mut();
        let st = &mut *st;
        st.active.extend(st.deferred.drain(..));
    }

    fn take_entry(&self, slot: u32) -> (CoroId, Option<Entry>) {
        let mut st = self.state.borrow_mut();
        let coro = &mut st.coros[slot as usize];
        (coro.id, coro.entry.take())
    }

    /// Return the running coroutine to the idle pool and leave its stack
    /// for good.
    fn finish(&self, slot: u32) -> ! {
        {
            let mut st = self.state.borrow_mut();
            let coro = &mut st.coros[slot as usize];
            coro.state = CoroState::Idle;
            coro.reason = WakeReason::Unset;
            ktrace!("{} finished", coro.id);
            st.idle.push_back(slot);
            st.current = SLOT_NONE;
        }

        kprint::clear_coro_id();
        // SAFETY: same as `suspend_for`; this context is never resumed
        // again, a later dispatch rebuilds it.
        unsafe {
            arch::context_switch(self.contexts[slot as usize].get(), self.main_ctx.get());
        }
        kerror!("finished coroutine on slot {} was resumed", slot);
        std::process::abort();
    }
}

/// Entry of every coroutine stack: run the body, then finish.
extern "C" fn coroutine_main(slot: usize) -> ! {
    let ptr = tls::scheduler_ptr();
    if ptr.is_null() {
        kerror!("coroutine started without a scheduler");
        std::process::abort();
    }
    // SAFETY: set by `tick`, which is below us on the bootstrap stack.
    let sched = unsafe { &*ptr };
    let slot = slot as u32;

    let (id, entry) = sched.take_entry(slot);
    if let Some(f) = entry {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
            let msg = payload
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                .unwrap_or("<non-string panic>");
            kerror!("{} panicked: {}", id, msg);
        }
    }

    sched.finish(slot)
}

// ============================================================================
// Thread-local shortcuts
// ============================================================================

/// Dispatch onto the scheduler driving this thread.
pub fn dispatch<F>(f: F) -> SchedResult<CoroHandle>
where
    F: FnOnce() + 'static,
{
    tls::with_scheduler(|s| s.dispatch(f)).unwrap_or(Err(SchedError::NotInitialized))
}

/// Suspend the running coroutine; see `Scheduler::suspend_for`.
pub fn suspend_for(timeout_ms: u64) -> SchedResult<()> {
    tls::with_scheduler(|s| s.suspend_for(timeout_ms)).unwrap_or(Err(SchedError::NotInCoroutine))
}

/// See `Scheduler::woke_by_timeout`.
pub fn woke_by_timeout() -> bool {
    tls::with_scheduler(|s| s.woke_by_timeout()).unwrap_or(false)
}

/// See `Scheduler::wake`.
pub fn wake(handle: CoroHandle) -> bool {
    tls::with_scheduler(|s| s.wake(handle)).unwrap_or(false)
}

/// See `Scheduler::wake_priority`.
pub fn wake_priority(handle: CoroHandle) -> bool {
    tls::with_scheduler(|s| s.wake_priority(handle)).unwrap_or(false)
}

/// Handle of the running coroutine on this thread.
pub fn current() -> Option<CoroHandle> {
    tls::with_scheduler(|s| s.current()).flatten()
}
