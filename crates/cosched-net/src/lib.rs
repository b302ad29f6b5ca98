//! # cosched-net
//!
//! Socket I/O for coroutines running on a `cosched_runtime::Runtime`.
//!
//! - `syscall` - `co_connect`, `co_accept`, `co_read`, `co_recv`,
//!   `co_write`, `co_send`, `co_send_all`: blocking-style calls that
//!   suspend the coroutine instead of the thread
//! - `sockopt` - descriptor policies applied at connection setup
//! - `net` - `CoListener` / `CoStream` with `std::io` traits

pub mod net;
pub mod sockopt;
pub mod syscall;

pub use net::{to_io, CoListener, CoStream};
pub use syscall::{co_accept, co_connect, co_read, co_recv, co_send, co_send_all, co_write, IoKind};
