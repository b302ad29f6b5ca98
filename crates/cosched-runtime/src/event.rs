//! Readiness event loop
//!
//! Level-triggered epoll over a fixed table indexed by descriptor. Each
//! slot holds the interest mask plus one callback and the coroutine it
//! wakes. `wait()` blocks for at most the given bound and invokes the
//! callback of every ready descriptor.
//!
//! The table is sized at construction; descriptors at or beyond it are
//! refused with `EventError::FdOutOfRange`, the only capacity failure.

use std::cell::RefCell;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use cosched_core::{kdebug, ktrace, kwarn};
use cosched_core::{CoroHandle, EventError};

use crate::scheduler::WaitPolicy;

/// Readiness interest bits.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest(u8);

impl Interest {
    pub const NONE: Interest = Interest(0);
    pub const READABLE: Interest = Interest(1);
    pub const WRITABLE: Interest = Interest(2);

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_readable(self) -> bool {
        self.0 & Self::READABLE.0 != 0
    }

    #[inline]
    pub const fn is_writable(self) -> bool {
        self.0 & Self::WRITABLE.0 != 0
    }

    #[inline]
    pub const fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }

    /// `self` with the bits of `other` cleared.
    #[inline]
    pub const fn without(self, other: Interest) -> Interest {
        Interest(self.0 & !other.0)
    }

    fn to_epoll_events(self) -> u32 {
        let mut events = 0;
        if self.is_readable() {
            events |= libc::EPOLLIN as u32;
        }
        if self.is_writable() {
            events |= libc::EPOLLOUT as u32;
        }
        events
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

impl BitOrAssign for Interest {
    fn bitor_assign(&mut self, rhs: Interest) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.is_readable(), self.is_writable()) {
            (false, false) => write!(f, "Interest(NONE)"),
            (true, false) => write!(f, "Interest(READABLE)"),
            (false, true) => write!(f, "Interest(WRITABLE)"),
            (true, true) => write!(f, "Interest(READABLE | WRITABLE)"),
        }
    }
}

/// Readiness callback: receives the coroutine registered with the fd.
pub type EventProc = fn(CoroHandle);

#[derive(Clone, Copy, Default)]
struct FdSlot {
    mask: Interest,
    handler: Option<(EventProc, CoroHandle)>,
}

/// epoll-backed readiness loop.
pub struct EventLoop {
    epfd: OwnedFd,
    slots: RefCell<Vec<FdSlot>>,
    ready: RefCell<Vec<libc::epoll_event>>,
}

impl EventLoop {
    /// Create the multiplexer with a table of `max_fds` descriptors.
    pub fn new(max_fds: usize) -> Result<Self, EventError> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(EventError::CreateFailed(last_errno()));
        }
        // SAFETY: fresh descriptor owned by nobody else.
        let epfd = unsafe { OwnedFd::from_raw_fd(fd) };

        kdebug!("event loop: epfd={} max_fds={}", fd, max_fds);

        Ok(Self {
            epfd,
            slots: RefCell::new(vec![FdSlot::default(); max_fds]),
            ready: RefCell::new(vec![libc::epoll_event { events: 0, u64: 0 }; max_fds.max(1)]),
        })
    }

    /// Table size.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.borrow().len()
    }

    fn check_range(&self, fd: RawFd) -> Result<usize, EventError> {
        let capacity = self.capacity();
        if fd < 0 || fd as usize >= capacity {
            return Err(EventError::FdOutOfRange { fd, capacity });
        }
        Ok(fd as usize)
    }

    /// Add `mask` to the interest set of `fd` and make `proc(target)` its
    /// callback.
    ///
    /// Masks merge with what is already registered; the callback is
    /// replaced.
    pub fn add_interest(
        &self,
        fd: RawFd,
        mask: Interest,
        proc: EventProc,
        target: CoroHandle,
    ) -> Result<(), EventError> {
        let idx = self.check_range(fd)?;
        let mut slots = self.slots.borrow_mut();
        let slot = &mut slots[idx];

        let merged = slot.mask | mask;
        let op = if slot.mask.is_empty() {
            libc::EPOLL_CTL_ADD
        } else {
            libc::EPOLL_CTL_MOD
        };
        self.ctl(op, fd, merged)?;

        slot.mask = merged;
        slot.handler = Some((proc, target));
        ktrace!("fd {} interest {:?} for {:?}", fd, merged, target);
        Ok(())
    }

    /// Clear `mask` from the interest set of `fd`; the descriptor leaves
    /// the multiplexer once nothing is left.
    pub fn remove_interest(&self, fd: RawFd, mask: Interest) {
        let Ok(idx) = self.check_range(fd) else {
            return;
        };
        let mut slots = self.slots.borrow_mut();
        let slot = &mut slots[idx];
        if slot.mask.is_empty() {
            return;
        }

        let left = slot.mask.without(mask);
        let op = if left.is_empty() {
            libc::EPOLL_CTL_DEL
        } else {
            libc::EPOLL_CTL_MOD
        };
        if let Err(e) = self.ctl(op, fd, left) {
            // Usually the descriptor was closed while registered
            kdebug!("fd {} deregistration: {}", fd, e);
        }

        slot.mask = left;
        if left.is_empty() {
            slot.handler = None;
        }
    }

    /// Registered interest of `fd` (empty when out of range).
    pub fn interest(&self, fd: RawFd) -> Interest {
        match self.check_range(fd) {
            Ok(idx) => self.slots.borrow()[idx].mask,
            Err(_) => Interest::NONE,
        }
    }

    /// Wait up to `timeout_ms` and run the callback of every ready
    /// descriptor. Returns the number of ready descriptors.
    pub fn wait(&self, timeout_ms: u64) -> usize {
        let timeout = timeout_ms.min(i32::MAX as u64) as i32;

        let n = {
            let mut ready = self.ready.borrow_mut();
            unsafe {
                libc::epoll_wait(
                    self.epfd.as_raw_fd(),
                    ready.as_mut_ptr(),
                    ready.len() as i32,
                    timeout,
                )
            }
        };
        if n < 0 {
            let errno = last_errno();
            if errno != libc::EINTR {
                kwarn!("epoll_wait failed: errno {}", errno);
            }
            return 0;
        }

        // Callbacks run with no table borrow held.
        for i in 0..n as usize {
            let fd = self.ready.borrow()[i].u64 as usize;
            let handler = self.slots.borrow().get(fd).and_then(|s| s.handler);
            if let Some((proc, target)) = handler {
                proc(target);
            }
        }
        n as usize
    }

    fn ctl(&self, op: i32, fd: RawFd, mask: Interest) -> Result<(), EventError> {
        let mut ev = libc::epoll_event {
            events: mask.to_epoll_events(),
            u64: fd as u64,
        };
        let ret = unsafe { libc::epoll_ctl(self.epfd.as_raw_fd(), op, fd, &mut ev) };
        if ret == 0 {
            return Ok(());
        }

        // The kernel drops closed descriptors on its own, which leaves the
        // table and the multiplexer out of step; retry with the other op.
        let errno = last_errno();
        let retry = match (op, errno) {
            (libc::EPOLL_CTL_MOD, libc::ENOENT) => libc::EPOLL_CTL_ADD,
            (libc::EPOLL_CTL_ADD, libc::EEXIST) => libc::EPOLL_CTL_MOD,
            (libc::EPOLL_CTL_DEL, libc::ENOENT) => return Ok(()),
            _ => return Err(EventError::Multiplexer(errno)),
        };
        let ret = unsafe { libc::epoll_ctl(self.epfd.as_raw_fd(), retry, fd, &mut ev) };
        if ret == 0 {
            Ok(())
        } else {
            Err(EventError::Multiplexer(last_errno()))
        }
    }
}

impl WaitPolicy for EventLoop {
    fn wait(&self, timeout_ms: u64) {
        EventLoop::wait(self, timeout_ms);
    }
}

#[inline]
fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cosched_core::CoroId;
    use std::cell::Cell;

    thread_local! {
        static FIRED: Cell<Option<CoroHandle>> = const { Cell::new(None) };
    }

    fn record(h: CoroHandle) {
        FIRED.with(|f| f.set(Some(h)));
    }

    fn pipe() -> (OwnedFd, OwnedFd) {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) }, 0);
        unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
    }

    #[test]
    fn test_interest_bits() {
        let both = Interest::READABLE | Interest::WRITABLE;
        assert!(both.contains(Interest::READABLE));
        assert_eq!(both.without(Interest::READABLE), Interest::WRITABLE);
        assert!(both.without(both).is_empty());
        assert_eq!(format!("{:?}", both), "Interest(READABLE | WRITABLE)");
    }

    #[test]
    fn test_fd_out_of_range() {
        let ev = EventLoop::new(4).unwrap();
        let h = CoroHandle::new(CoroId::new(1), 0);
        let err = ev.add_interest(4, Interest::READABLE, record, h).unwrap_err();
        assert_eq!(err, EventError::FdOutOfRange { fd: 4, capacity: 4 });
        assert_eq!(err.errno(), libc::ERANGE);
        assert!(ev.add_interest(-1, Interest::READABLE, record, h).is_err());
    }

    #[test]
    fn test_pipe_readiness_invokes_callback() {
        let (rx, tx) = pipe();
        let ev = EventLoop::new(1024).unwrap();
        let h = CoroHandle::new(CoroId::new(9), 3);

        ev.add_interest(rx.as_raw_fd(), Interest::READABLE, record, h).unwrap();
        FIRED.with(|f| f.set(None));
        assert_eq!(ev.wait(0), 0);
        assert_eq!(FIRED.with(|f| f.get()), None);

        let byte = [1u8];
        assert_eq!(unsafe { libc::write(tx.as_raw_fd(), byte.as_ptr().cast(), 1) }, 1);
        assert_eq!(ev.wait(100), 1);
        assert_eq!(FIRED.with(|f| f.get()), Some(h));
    }

    #[test]
    fn test_masks_merge_and_remove() {
        let (rx, _tx) = pipe();
        let fd = rx.as_raw_fd();
        let ev = EventLoop::new(1024).unwrap();
        let h = CoroHandle::new(CoroId::new(1), 0);

        ev.add_interest(fd, Interest::READABLE, record, h).unwrap();
        ev.add_interest(fd, Interest::WRITABLE, record, h).unwrap();
        assert_eq!(ev.interest(fd), Interest::READABLE | Interest::WRITABLE);

        ev.remove_interest(fd, Interest::WRITABLE);
        assert_eq!(ev.interest(fd), Interest::READABLE);

        ev.remove_interest(fd, Interest::READABLE);
        assert!(ev.interest(fd).is_empty());

        // Re-adding after full removal goes through ADD again
        ev.add_interest(fd, Interest::READABLE, record, h).unwrap();
        assert_eq!(ev.interest(fd), Interest::READABLE);
    }

    #[test]
    fn test_removed_fd_not_reported() {
        let (rx, tx) = pipe();
        let ev = EventLoop::new(1024).unwrap();
        let h = CoroHandle::new(CoroId::new(2), 1);

        ev.add_interest(rx.as_raw_fd(), Interest::READABLE, record, h).unwrap();
        ev.remove_interest(rx.as_raw_fd(), Interest::READABLE);

        let byte = [1u8];
        assert_eq!(unsafe { libc::write(tx.as_raw_fd(), byte.as_ptr().cast(), 1) }, 1);
        FIRED.with(|f| f.set(None));
        assert_eq!(ev.wait(10), 0);
        assert_eq!(FIRED.with(|f| f.get()), None);
    }
}
