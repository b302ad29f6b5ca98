//! # cosched-runtime
//!
//! Single-threaded stackful coroutine runtime.
//!
//! This crate provides:
//! - Coroutine stacks with guard pages (`memory`)
//! - Context switching (architecture-specific assembly, `arch`)
//! - Deadline index over a fixed node pool (`timer`)
//! - The cooperative scheduler (`scheduler`)
//! - The epoll readiness loop (`event`)
//! - `Runtime`, which joins the scheduler and the event loop

pub mod arch;
pub mod config;
pub mod event;
pub mod memory;
pub mod runtime;
pub mod scheduler;
pub mod timer;
pub mod tls;

// Re-exports
pub use config::RuntimeConfig;
pub use event::{EventLoop, EventProc, Interest};
pub use memory::Stack;
pub use runtime::Runtime;
pub use scheduler::{Scheduler, SleepWait, Stats, WaitPolicy};
pub use timer::TimerIndex;
