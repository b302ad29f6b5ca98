//! # cosched-core
//!
//! Core types for the cosched coroutine runtime.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! Stacks, context switching, the scheduler and the event loop live in
//! `cosched-runtime`.
//!
//! ## Modules
//!
//! - `id` - Coroutine identifier and wake handle
//! - `state` - Coroutine lifecycle state and wake reason
//! - `error` - Error types
//! - `kprint` - Leveled stderr logging macros
//! - `env` - Environment variable utilities

pub mod id;
pub mod state;
pub mod error;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use id::{CoroId, CoroHandle};
pub use state::{CoroState, WakeReason};
pub use error::{SchedError, SchedResult, MemoryError, TimerError, EventError};
pub use env::{env_get, env_get_bool, env_get_ms};

/// Shared constants
pub mod constants {
    /// Upper bound for a coroutine stack (10 MiB)
    pub const MAX_STACK_SIZE: usize = 10 * 1024 * 1024;

    /// Descriptors reserved for the process on top of the connection limit
    pub const RESERVED_FDS: usize = 128;

    /// Slot sentinel for "no coroutine" (the bootstrap context)
    pub const SLOT_NONE: u32 = u32::MAX;
}
