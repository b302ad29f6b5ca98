//! Coroutine state and wake reason

/// Scheduling state of a coroutine slot.
///
/// Exactly one of these holds at any time. `Running` is not a queue
/// membership: it marks the single slot the scheduler's "current"
/// pointer refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CoroState {
    /// Finished (or never used), parked in the idle pool
    Idle = 0,

    /// Queued in the active queue, waiting for its turn
    Active = 1,

    /// Currently executing on its own stack
    Running = 2,

    /// Parked in the timer index until a wake or its deadline
    Suspended = 3,
}

impl CoroState {
    /// Can `wake`/`wake_priority` move this coroutine?
    #[inline]
    pub const fn is_wakeable(&self) -> bool {
        matches!(self, CoroState::Suspended)
    }
}

/// Why a suspended coroutine was put back on the active queue.
///
/// Tri-state: the flag is reset to `Unset` every time it is read, so a
/// stale reason from an earlier suspension never leaks into the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WakeReason {
    #[default]
    Unset,

    /// Woken explicitly by `wake`/`wake_priority` (fd readiness)
    Explicit,

    /// Woken because its deadline expired
    Timeout,
}

impl WakeReason {
    #[inline]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, WakeReason::Timeout)
    }
}
