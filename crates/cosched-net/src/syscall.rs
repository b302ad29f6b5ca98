//! Cooperative socket calls
//!
//! Each `co_*` function behaves like its blocking counterpart from the
//! caller's point of view, but when the descriptor is not ready the
//! running coroutine registers readiness interest, suspends with a bound,
//! and retries once woken. Other coroutines run meanwhile.
//!
//! Return convention: non-negative result on success, negative errno on
//! failure. A bound that elapses yields `-ETIME` (`-ETIMEDOUT` for
//! connect); a descriptor beyond the event table yields `-ERANGE`.
//!
//! Outside a coroutine there is nothing to suspend, so the real call's
//! result is returned as is (`-EAGAIN`, `-EINPROGRESS`, ...).

use std::os::fd::RawFd;

use nix::errno::Errno;
use nix::sys::socket::SockaddrLike;

use cosched_core::{kdebug, ktrace, CoroHandle};
use cosched_runtime::config::{defaults, RuntimeConfig};
use cosched_runtime::event::{EventProc, Interest};
use cosched_runtime::{scheduler, tls};

use crate::sockopt;

/// What a parked call is waiting for; selects interest, bound and wake
/// discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoKind {
    Connect,
    Accept,
    Read,
    Write,
}

impl IoKind {
    fn interest(self) -> Interest {
        match self {
            IoKind::Connect | IoKind::Write => Interest::WRITABLE,
            IoKind::Accept | IoKind::Read => Interest::READABLE,
        }
    }

    /// Per-wait bound in milliseconds.
    pub fn timeout_ms(self, config: &RuntimeConfig) -> u64 {
        let bound = match self {
            IoKind::Connect => config.connect_timeout,
            IoKind::Accept => config.accept_timeout,
            IoKind::Read => config.read_timeout,
            IoKind::Write => config.write_timeout,
        };
        bound.as_millis() as u64
    }

    fn timeout_errno(self) -> Errno {
        match self {
            IoKind::Connect => Errno::ETIMEDOUT,
            _ => Errno::ETIME,
        }
    }

    /// Connection setup runs ahead of data transfer.
    fn on_ready(self) -> EventProc {
        match self {
            IoKind::Connect | IoKind::Accept => wake_first,
            IoKind::Read | IoKind::Write => wake_in_turn,
        }
    }
}

fn wake_in_turn(h: CoroHandle) {
    scheduler::wake(h);
}

fn wake_first(h: CoroHandle) {
    scheduler::wake_priority(h);
}

enum Park {
    Ready,
    TimedOut,
    Failed(Errno),
    /// No coroutine to suspend
    Detached,
}

/// Suspend the running coroutine until `fd` is ready for `kind` or the
/// bound elapses. Interest is always withdrawn before returning.
fn park(fd: RawFd, kind: IoKind) -> Park {
    tls::with_runtime(|rt| {
        let sched = rt.scheduler();
        let Some(me) = sched.current() else {
            return Park::Detached;
        };

        let interest = kind.interest();
        if let Err(e) = rt.events().add_interest(fd, interest, kind.on_ready(), me) {
            kdebug!("fd {} not registered: {}", fd, e);
            return Park::Failed(Errno::from_raw(e.errno()));
        }

        let suspended = sched.suspend_for(kind.timeout_ms(rt.config()));
        rt.events().remove_interest(fd, interest);
        if suspended.is_err() {
            return Park::Detached;
        }

        if sched.woke_by_timeout() {
            ktrace!("fd {} {:?} timed out", fd, kind);
            Park::TimedOut
        } else {
            Park::Ready
        }
    })
    .unwrap_or(Park::Detached)
}

#[inline]
fn neg(e: Errno) -> i64 {
    -(e as i64)
}

/// Run `op` until it succeeds, fails for real, or its wait times out.
fn retry_io<F>(fd: RawFd, kind: IoKind, mut op: F) -> i64
where
    F: FnMut() -> isize,
{
    loop {
        let ret = op();
        if ret >= 0 {
            return ret as i64;
        }

        match Errno::last() {
            Errno::EINTR => continue,
            Errno::EAGAIN => {}
            e => return neg(e),
        }

        match park(fd, kind) {
            Park::Ready => continue,
            Park::TimedOut => return neg(kind.timeout_errno()),
            Park::Failed(e) => return neg(e),
            Park::Detached => return neg(Errno::EAGAIN),
        }
    }
}

/// `read(2)` on a non-blocking descriptor.
pub fn co_read(fd: RawFd, buf: &mut [u8]) -> i64 {
    retry_io(fd, IoKind::Read, || unsafe {
        libc::read(fd, buf.as_mut_ptr().cast(), buf.len())
    })
}

/// `recv(2)` on a non-blocking socket.
pub fn co_recv(fd: RawFd, buf: &mut [u8], flags: i32) -> i64 {
    retry_io(fd, IoKind::Read, || unsafe {
        libc::recv(fd, buf.as_mut_ptr().cast(), buf.len(), flags)
    })
}

/// `write(2)` on a non-blocking descriptor. May be partial.
pub fn co_write(fd: RawFd, buf: &[u8]) -> i64 {
    retry_io(fd, IoKind::Write, || unsafe {
        libc::write(fd, buf.as_ptr().cast(), buf.len())
    })
}

/// `send(2)` on a non-blocking socket. May be partial.
pub fn co_send(fd: RawFd, buf: &[u8], flags: i32) -> i64 {
    retry_io(fd, IoKind::Write, || unsafe {
        libc::send(fd, buf.as_ptr().cast(), buf.len(), flags)
    })
}

/// Send all of `buf`. Returns `buf.len()` or the first negative errno.
pub fn co_send_all(fd: RawFd, buf: &[u8], flags: i32) -> i64 {
    let mut sent = 0usize;
    while sent < buf.len() {
        let n = co_send(fd, &buf[sent..], flags);
        if n < 0 {
            return n;
        }
        if n == 0 {
            return neg(Errno::EPIPE);
        }
        sent += n as usize;
    }
    sent as i64
}

/// Accept a connection on a non-blocking listener.
///
/// The new descriptor is close-on-exec, non-blocking, with `TCP_NODELAY`
/// and keepalive applied. Readiness wakes take priority over data wakes.
pub fn co_accept(fd: RawFd) -> i64 {
    let conn = retry_io(fd, IoKind::Accept, || unsafe {
        libc::accept4(fd, std::ptr::null_mut(), std::ptr::null_mut(), libc::SOCK_CLOEXEC) as isize
    });
    if conn < 0 {
        return conn;
    }

    let conn = conn as RawFd;
    let keepalive = tls::with_runtime(|rt| rt.config().keepalive_secs).unwrap_or(defaults::KEEPALIVE_SECS);
    if let Err(e) = sockopt::prepare_accepted(conn, keepalive) {
        unsafe { libc::close(conn) };
        return neg(e);
    }
    conn as i64
}

/// Connect `fd` to `addr`, suspending while the handshake completes.
///
/// `fd` is switched to non-blocking mode first. The outcome is read from
/// `SO_ERROR` once the socket turns writable.
pub fn co_connect<A: SockaddrLike>(fd: RawFd, addr: &A) -> i64 {
    if let Err(e) = sockopt::set_nonblock(fd) {
        return neg(e);
    }

    let ret = unsafe { libc::connect(fd, addr.as_ptr(), addr.len()) };
    if ret == 0 {
        return 0;
    }
    match Errno::last() {
        // An interrupted connect keeps going asynchronously
        Errno::EINPROGRESS | Errno::EINTR => {}
        e => return neg(e),
    }

    match park(fd, IoKind::Connect) {
        Park::Ready => match sockopt::take_error(fd) {
            Ok(0) => 0,
            Ok(err) => -(err as i64),
            Err(e) => neg(e),
        },
        Park::TimedOut => neg(IoKind::Connect.timeout_errno()),
        Park::Failed(e) => neg(e),
        Park::Detached => neg(Errno::EINPROGRESS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cosched_runtime::Runtime;
    use std::cell::Cell;
    use std::io::Write;
    use std::net::TcpListener;
    use nix::sys::socket::getsockopt;
    use nix::sys::socket::sockopt::{KeepAlive, TcpNoDelay};
    use std::os::fd::{AsRawFd, BorrowedFd};
    use std::os::unix::net::UnixStream;
    use std::rc::Rc;
    use std::time::{Duration, Instant};

    fn test_runtime(config: RuntimeConfig) -> Runtime {
        Runtime::new(config.max_coroutines(8).stack_size(256 * 1024)).unwrap()
    }

    fn pair() -> (UnixStream, UnixStream) {
        let (a, b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        b.set_nonblocking(true).unwrap();
        (a, b)
    }

    #[test]
    fn test_outside_coroutine_returns_real_result() {
        let (a, mut b) = pair();
        let mut buf = [0u8; 8];
        assert_eq!(co_read(a.as_raw_fd(), &mut buf), -(libc::EAGAIN as i64));

        b.write_all(b"hi").unwrap();
        assert_eq!(co_read(a.as_raw_fd(), &mut buf), 2);
        assert_eq!(&buf[..2], b"hi");
    }

    #[test]
    fn test_read_suspends_until_data() {
        let rt = test_runtime(RuntimeConfig::new());
        let (a, b) = pair();
        let (rfd, wfd) = (a.as_raw_fd(), b.as_raw_fd());
        let got = Rc::new(Cell::new(0i64));

        let g = got.clone();
        rt.dispatch(move || {
            let mut buf = [0u8; 16];
            g.set(co_read(rfd, &mut buf));
        })
        .unwrap();
        rt.dispatch(move || {
            assert_eq!(co_write(wfd, b"hello"), 5);
        })
        .unwrap();

        rt.run_until_idle();
        assert_eq!(got.get(), 5);
        assert!(rt.events().interest(rfd).is_empty());
    }

    #[test]
    fn test_read_timeout() {
        let rt = test_runtime(RuntimeConfig::new().read_timeout(Duration::from_millis(50)));
        let (a, _b) = pair();
        let fd = a.as_raw_fd();
        let got = Rc::new(Cell::new(0i64));

        let g = got.clone();
        rt.dispatch(move || {
            let mut buf = [0u8; 16];
            g.set(co_read(fd, &mut buf));
        })
        .unwrap();

        let start = Instant::now();
        rt.run_until_idle();
        let elapsed = start.elapsed();

        assert_eq!(got.get(), -(libc::ETIME as i64));
        assert!(elapsed >= Duration::from_millis(45));
        assert!(elapsed < Duration::from_secs(2));
        assert!(rt.events().interest(fd).is_empty());
    }

    #[test]
    fn test_fd_beyond_table_is_erange() {
        let rt = test_runtime(RuntimeConfig::new().max_fds(3));
        let (a, _b) = pair();
        let fd = a.as_raw_fd();
        assert!(fd >= 3);
        let got = Rc::new(Cell::new(0i64));

        let g = got.clone();
        rt.dispatch(move || {
            let mut buf = [0u8; 4];
            g.set(co_recv(fd, &mut buf, 0));
        })
        .unwrap();

        rt.run_until_idle();
        assert_eq!(got.get(), -(libc::ERANGE as i64));
    }

    #[test]
    fn test_accept_applies_policies() {
        let rt = test_runtime(RuntimeConfig::new());
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        let lfd = listener.as_raw_fd();
        let accepted = Rc::new(Cell::new(-1i64));

        let acc = accepted.clone();
        rt.dispatch(move || acc.set(co_accept(lfd))).unwrap();
        rt.dispatch(move || {
            let _client = std::net::TcpStream::connect(addr).unwrap();
            // Let the acceptor run before the client closes
            scheduler::suspend_for(20).unwrap();
        })
        .unwrap();

        rt.run_until_idle();
        let conn = accepted.get();
        assert!(conn >= 0, "accept returned {}", conn);

        let conn = conn as RawFd;
        let b = unsafe { BorrowedFd::borrow_raw(conn) };
        assert!(sockopt::is_nonblocking(conn).unwrap());
        assert!(getsockopt(&b, TcpNoDelay).unwrap());
        assert!(getsockopt(&b, KeepAlive).unwrap());
        unsafe { libc::close(conn) };
    }

    #[test]
    fn test_accept_fails_when_policies_cannot_apply() {
        let rt = test_runtime(RuntimeConfig::new());
        let path = std::env::temp_dir().join(format!("cosched-accept-{}.sock", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let listener = std::os::unix::net::UnixListener::bind(&path).unwrap();
        listener.set_nonblocking(true).unwrap();
        let _client = UnixStream::connect(&path).unwrap();
        let lfd = listener.as_raw_fd();
        let got = Rc::new(Cell::new(0i64));

        let g = got.clone();
        rt.dispatch(move || g.set(co_accept(lfd))).unwrap();
        rt.run_until_idle();
        let _ = std::fs::remove_file(&path);

        // TCP_NODELAY is refused on a unix socket; the connection is dropped
        assert_eq!(got.get(), -(libc::EOPNOTSUPP as i64));
    }

    #[test]
    fn test_accept_timeout() {
        let rt = test_runtime(RuntimeConfig::new().accept_timeout(Duration::from_millis(30)));
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let lfd = listener.as_raw_fd();
        let got = Rc::new(Cell::new(0i64));

        let g = got.clone();
        rt.dispatch(move || g.set(co_accept(lfd))).unwrap();
        rt.run_until_idle();
        assert_eq!(got.get(), -(libc::ETIME as i64));
    }

    #[test]
    fn test_send_all_across_partial_writes() {
        let rt = test_runtime(RuntimeConfig::new());
        let (a, b) = pair();
        let (wfd, rfd) = (a.as_raw_fd(), b.as_raw_fd());
        let payload: Rc<Vec<u8>> = Rc::new((0..512 * 1024).map(|i| i as u8).collect());
        let received = Rc::new(Cell::new(0usize));
        let sent = Rc::new(Cell::new(0i64));

        let (p, s) = (payload.clone(), sent.clone());
        rt.dispatch(move || s.set(co_send_all(wfd, &p, 0))).unwrap();

        let r = received.clone();
        rt.dispatch(move || {
            let mut buf = vec![0u8; 64 * 1024];
            let mut total = 0;
            while total < 512 * 1024 {
                let n = co_read(rfd, &mut buf);
                if n <= 0 {
                    break;
                }
                total += n as usize;
            }
            r.set(total);
        })
        .unwrap();

        rt.run_until_idle();
        assert_eq!(sent.get(), payload.len() as i64);
        assert_eq!(received.get(), payload.len());
    }
}
