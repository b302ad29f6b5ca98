//! Error types for the coroutine runtime

use core::fmt;

/// Result type for scheduler operations
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors that can occur in scheduler operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedError {
    /// Coroutine capacity reached; the caller should shed the work
    Busy,

    /// A suspension primitive was called from the bootstrap context
    NotInCoroutine,

    /// No scheduler is driving this thread
    NotInitialized,

    /// Configuration rejected by `validate()`
    InvalidConfig(&'static str),

    /// Stack mapping failed
    Memory(MemoryError),

    /// Readiness multiplexer failure
    Event(EventError),
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedError::Busy => write!(f, "coroutine capacity exhausted"),
            SchedError::NotInCoroutine => write!(f, "not running inside a coroutine"),
            SchedError::NotInitialized => write!(f, "scheduler not initialized"),
            SchedError::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
            SchedError::Memory(e) => write!(f, "memory error: {}", e),
            SchedError::Event(e) => write!(f, "event loop error: {}", e),
        }
    }
}

impl std::error::Error for SchedError {}

/// Stack allocation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// mmap failed
    AllocationFailed,

    /// mprotect on the guard page failed
    ProtectionFailed,

    /// Requested size is zero or overflows
    InvalidSize,
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::AllocationFailed => write!(f, "stack allocation failed"),
            MemoryError::ProtectionFailed => write!(f, "guard page protection failed"),
            MemoryError::InvalidSize => write!(f, "invalid stack size"),
        }
    }
}

impl From<MemoryError> for SchedError {
    fn from(e: MemoryError) -> Self {
        SchedError::Memory(e)
    }
}

/// Timer index errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    /// Every pooled timer node is in use
    PoolExhausted,
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerError::PoolExhausted => write!(f, "timer node pool exhausted"),
        }
    }
}

impl std::error::Error for TimerError {}

/// Event loop errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Descriptor does not fit the fd table
    FdOutOfRange { fd: i32, capacity: usize },

    /// epoll_ctl/epoll_wait failed with this errno
    Multiplexer(i32),

    /// epoll_create1 failed with this errno
    CreateFailed(i32),
}

impl EventError {
    /// errno equivalent, for callers that speak the syscall convention
    pub fn errno(&self) -> i32 {
        match self {
            EventError::FdOutOfRange { .. } => libc_erange(),
            EventError::Multiplexer(e) | EventError::CreateFailed(e) => *e,
        }
    }
}

// ERANGE is 34 on every Linux target; core stays free of libc.
#[inline]
const fn libc_erange() -> i32 {
    34
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventError::FdOutOfRange { fd, capacity } => {
                write!(f, "fd {} exceeds event table capacity {}", fd, capacity)
            }
            EventError::Multiplexer(e) => write!(f, "multiplexer error (errno {})", e),
            EventError::CreateFailed(e) => write!(f, "failed to create multiplexer (errno {})", e),
        }
    }
}

impl From<EventError> for SchedError {
    fn from(e: EventError) -> Self {
        SchedError::Event(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = SchedError::Busy;
        assert_eq!(format!("{}", e), "coroutine capacity exhausted");

        let e = SchedError::Memory(MemoryError::AllocationFailed);
        assert_eq!(format!("{}", e), "memory error: stack allocation failed");

        let e = EventError::FdOutOfRange { fd: 2000, capacity: 1152 };
        assert_eq!(format!("{}", e), "fd 2000 exceeds event table capacity 1152");
    }

    #[test]
    fn test_error_conversion() {
        let sched_err: SchedError = MemoryError::ProtectionFailed.into();
        assert!(matches!(sched_err, SchedError::Memory(MemoryError::ProtectionFailed)));

        let sched_err: SchedError = EventError::Multiplexer(9).into();
        assert!(matches!(sched_err, SchedError::Event(EventError::Multiplexer(9))));
    }

    #[test]
    fn test_event_errno() {
        assert_eq!(EventError::FdOutOfRange { fd: 1, capacity: 0 }.errno(), 34);
        assert_eq!(EventError::Multiplexer(9).errno(), 9);
    }
}
