//! # cosched - cooperative stackful coroutines
//!
//! One OS thread runs many coroutines. Each owns a stack; it runs until it
//! suspends on a timer or a socket, and the scheduler resumes it when the
//! deadline passes or the descriptor turns ready.
//!
//! ## Quick Start
//!
//! ```ignore
//! use cosched::{Runtime, RuntimeConfig, CoListener};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let rt = Runtime::new(RuntimeConfig::from_env())?;
//!     rt.dispatch(|| {
//!         let listener = CoListener::bind("127.0.0.1:9999").unwrap();
//!         while let Ok((stream, _)) = listener.accept() {
//!             let _ = cosched::dispatch(move || serve(stream));
//!         }
//!     })?;
//!     rt.run_cycle()
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  co_accept / co_read / co_send ...  (cosched-net)        │
//! └──────────────────────────────────────────────────────────┘
//!            │ add_interest + suspend_for       ▲ wake
//!            ▼                                  │
//! ┌────────────────────┐   wait(bound)   ┌──────────────────┐
//! │     Scheduler      │ ──────────────► │    EventLoop     │
//! │ idle/active/timers │                 │  epoll + fd table│
//! └────────────────────┘                 └──────────────────┘
//!            │ context_switch
//!            ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │  Stacks: mmap + guard page, reused across dispatches     │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub use cosched_core::{kdebug, kerror, kinfo, kprint, kprintln, ktrace, kwarn};
pub use cosched_core::{CoroHandle, CoroId, CoroState, EventError, MemoryError, SchedError, SchedResult, WakeReason};

pub use cosched_runtime::scheduler::{current, dispatch, suspend_for, wake, wake_priority, woke_by_timeout};
pub use cosched_runtime::{
    EventLoop, EventProc, Interest, Runtime, RuntimeConfig, Scheduler, SleepWait, Stats, WaitPolicy,
};

pub use cosched_net::{
    co_accept, co_connect, co_read, co_recv, co_send, co_send_all, co_write, CoListener, CoStream,
};

/// Lower-level modules
pub mod runtime {
    pub use cosched_runtime::*;
}

pub mod net {
    pub use cosched_net::*;
}
