//! Thread-local access to the scheduler and runtime driving this thread
//!
//! The pointers are set by `enter_*` guards for the duration of a
//! scheduling step, so coroutine bodies and readiness callbacks can reach
//! the scheduler without threading a reference through every call.

use std::cell::Cell;
use std::ptr;

use crate::runtime::Runtime;
use crate::scheduler::Scheduler;

thread_local! {
    /// Scheduler currently driving this OS thread
    static SCHEDULER: Cell<*const Scheduler> = const { Cell::new(ptr::null()) };

    /// Runtime (scheduler plus event loop) currently driving this OS thread
    static RUNTIME: Cell<*const Runtime> = const { Cell::new(ptr::null()) };
}

/// Restores the previous scheduler pointer on drop.
pub(crate) struct SchedulerGuard {
    prev: *const Scheduler,
}

impl Drop for SchedulerGuard {
    fn drop(&mut self) {
        SCHEDULER.with(|cell| cell.set(self.prev));
    }
}

/// Restores the previous runtime pointer on drop.
pub(crate) struct RuntimeGuard {
    prev: *const Runtime,
}

impl Drop for RuntimeGuard {
    fn drop(&mut self) {
        RUNTIME.with(|cell| cell.set(self.prev));
    }
}

#[inline]
pub(crate) fn enter_scheduler(sched: &Scheduler) -> SchedulerGuard {
    let prev = SCHEDULER.with(|cell| cell.replace(sched as *const Scheduler));
    SchedulerGuard { prev }
}

#[inline]
pub(crate) fn enter_runtime(rt: &Runtime) -> RuntimeGuard {
    let prev = RUNTIME.with(|cell| cell.replace(rt as *const Runtime));
    RuntimeGuard { prev }
}

#[inline]
pub(crate) fn scheduler_ptr() -> *const Scheduler {
    SCHEDULER.with(|cell| cell.get())
}

/// Run `f` against the scheduler driving this thread, if any.
#[inline]
pub fn with_scheduler<R>(f: impl FnOnce(&Scheduler) -> R) -> Option<R> {
    let ptr = scheduler_ptr();
    if ptr.is_null() {
        return None;
    }
    // SAFETY: the pointer is only set while an enter guard borrows the
    // scheduler, and cleared when that guard drops.
    Some(f(unsafe { &*ptr }))
}

/// Run `f` against the runtime driving this thread, if any.
#[inline]
pub fn with_runtime<R>(f: impl FnOnce(&Runtime) -> R) -> Option<R> {
    let ptr = RUNTIME.with(|cell| cell.get());
    if ptr.is_null() {
        return None;
    }
    // SAFETY: as for `with_scheduler`.
    Some(f(unsafe { &*ptr }))
}
