//! Descriptor policies applied at connection setup

use std::os::fd::{BorrowedFd, RawFd};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::socket::{getsockopt, setsockopt, sockopt};

/// Probes sent before an idle connection is declared dead.
pub const KEEPALIVE_PROBES: u32 = 3;

#[inline]
fn borrow(fd: RawFd) -> BorrowedFd<'static> {
    // SAFETY: callers pass a descriptor they keep open for the duration
    // of the call; the borrow never outlives it.
    unsafe { BorrowedFd::borrow_raw(fd) }
}

/// Set `O_NONBLOCK`, keeping the other status flags.
pub fn set_nonblock(fd: RawFd) -> Result<(), Errno> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    if flags.contains(OFlag::O_NONBLOCK) {
        return Ok(());
    }
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

/// Whether `O_NONBLOCK` is set.
pub fn is_nonblocking(fd: RawFd) -> Result<bool, Errno> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    Ok(flags.contains(OFlag::O_NONBLOCK))
}

/// Disable Nagle's algorithm.
pub fn set_nodelay(fd: RawFd) -> Result<(), Errno> {
    setsockopt(&borrow(fd), sockopt::TcpNoDelay, &true)
}

/// Enable keepalive with `idle_secs` before the first probe, probes every
/// `idle_secs / 3` (at least 1) seconds, and `KEEPALIVE_PROBES` probes.
pub fn set_keepalive(fd: RawFd, idle_secs: u32) -> Result<(), Errno> {
    let fd = borrow(fd);
    let idle = idle_secs.max(1);
    setsockopt(&fd, sockopt::KeepAlive, &true)?;
    setsockopt(&fd, sockopt::TcpKeepIdle, &idle)?;
    setsockopt(&fd, sockopt::TcpKeepInterval, &(idle / 3).max(1))?;
    setsockopt(&fd, sockopt::TcpKeepCount, &KEEPALIVE_PROBES)?;
    Ok(())
}

/// Policies for a freshly accepted connection: non-blocking, `TCP_NODELAY`
/// and keepalive. The first one that fails is returned.
pub fn prepare_accepted(fd: RawFd, keepalive_secs: u32) -> Result<(), Errno> {
    set_nonblock(fd)?;
    set_nodelay(fd)?;
    set_keepalive(fd, keepalive_secs)
}

/// Read and clear the pending socket error (`SO_ERROR`); 0 when none.
pub fn take_error(fd: RawFd) -> Result<i32, Errno> {
    getsockopt(&borrow(fd), sockopt::SocketError)
}
