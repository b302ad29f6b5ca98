//! # TCP types for coroutines
//!
//! `CoListener` and `CoStream` wrap std sockets in non-blocking mode and
//! route I/O through the `co_*` calls, so a coroutine reads like
//! blocking code:
//!
//! ```ignore
//! let listener = CoListener::bind("0.0.0.0:8080")?;
//! loop {
//!     match listener.accept() {
//!         Ok((stream, _peer)) => { rt.dispatch(move || serve(stream))?; }
//!         Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
//!         Err(e) => return Err(e),
//!     }
//! }
//! ```

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, RawFd};

use nix::sys::socket::{socket, AddressFamily, SockFlag, SockType, SockaddrStorage};

use crate::syscall::{co_accept, co_connect, co_recv, co_send};

/// Map the `co_*` return convention onto `io::Result`.
///
/// Both timeout codes become `ErrorKind::TimedOut`.
pub fn to_io(ret: i64) -> io::Result<usize> {
    if ret >= 0 {
        return Ok(ret as usize);
    }
    let errno = (-ret) as i32;
    if errno == libc::ETIME {
        return Err(io::Error::new(io::ErrorKind::TimedOut, "operation timed out"));
    }
    Err(io::Error::from_raw_os_error(errno))
}

/// Listening socket whose `accept` suspends the calling coroutine.
#[derive(Debug)]
pub struct CoListener {
    inner: TcpListener,
}

impl CoListener {
    /// Bind and listen, then switch to non-blocking mode.
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        Self::from_std(TcpListener::bind(addr)?)
    }

    pub fn from_std(inner: TcpListener) -> io::Result<Self> {
        inner.set_nonblocking(true)?;
        Ok(Self { inner })
    }

    /// Wait (bounded by the accept timeout) for the next connection.
    ///
    /// The returned stream is already non-blocking with `TCP_NODELAY` and
    /// keepalive set.
    pub fn accept(&self) -> io::Result<(CoStream, SocketAddr)> {
        let fd = to_io(co_accept(self.inner.as_raw_fd()))? as RawFd;
        // SAFETY: co_accept handed us a fresh descriptor.
        let stream = unsafe { TcpStream::from_raw_fd(fd) };
        let peer = stream.peer_addr()?;
        Ok((CoStream { inner: stream }, peer))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

impl AsRawFd for CoListener {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

impl AsFd for CoListener {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.as_fd()
    }
}

/// Connected socket whose reads and writes suspend the calling coroutine.
#[derive(Debug)]
pub struct CoStream {
    inner: TcpStream,
}

impl CoStream {
    /// Open a non-blocking socket and connect it, bounded by the connect
    /// timeout.
    pub fn connect(addr: SocketAddr) -> io::Result<Self> {
        let family = match addr {
            SocketAddr::V4(_) => AddressFamily::Inet,
            SocketAddr::V6(_) => AddressFamily::Inet6,
        };
        let fd = socket(
            family,
            SockType::Stream,
            SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
            None,
        )?;

        let target = SockaddrStorage::from(addr);
        to_io(co_connect(fd.as_raw_fd(), &target))?;

        let inner = TcpStream::from(fd);
        inner.set_nodelay(true)?;
        Ok(Self { inner })
    }

    pub fn from_std(inner: TcpStream) -> io::Result<Self> {
        inner.set_nonblocking(true)?;
        Ok(Self { inner })
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner.peer_addr()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        self.inner.shutdown(how)
    }

    pub fn into_std(self) -> TcpStream {
        self.inner
    }
}

impl Read for &CoStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        to_io(co_recv(self.inner.as_raw_fd(), buf, 0))
    }
}

impl Write for &CoStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        to_io(co_send(self.inner.as_raw_fd(), buf, libc::MSG_NOSIGNAL))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for CoStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (&*self).read(buf)
    }
}

impl Write for CoStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&*self).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AsRawFd for CoStream {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

impl AsFd for CoStream {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.as_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sockopt;
    use cosched_runtime::{Runtime, RuntimeConfig};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    fn test_runtime() -> Runtime {
        let config = RuntimeConfig::new()
            .max_coroutines(8)
            .stack_size(256 * 1024)
            .accept_timeout(Duration::from_millis(500));
        Runtime::new(config).unwrap()
    }

    #[test]
    fn test_to_io_mapping() {
        assert_eq!(to_io(12).unwrap(), 12);
        assert_eq!(to_io(-(libc::ETIME as i64)).unwrap_err().kind(), io::ErrorKind::TimedOut);
        assert_eq!(to_io(-(libc::ETIMEDOUT as i64)).unwrap_err().kind(), io::ErrorKind::TimedOut);
        assert_eq!(to_io(-(libc::ECONNREFUSED as i64)).unwrap_err().kind(), io::ErrorKind::ConnectionRefused);
    }

    #[test]
    fn test_echo_round_trip() {
        let rt = test_runtime();
        let listener = Rc::new(CoListener::bind("127.0.0.1:0").unwrap());
        let addr = listener.local_addr().unwrap();
        let reply = Rc::new(RefCell::new(Vec::new()));
        let accepted_fd = Rc::new(RefCell::new(None));

        let (l, fdslot) = (listener.clone(), accepted_fd.clone());
        rt.dispatch(move || {
            let (mut stream, _peer) = l.accept().unwrap();
            *fdslot.borrow_mut() = Some((
                sockopt::is_nonblocking(stream.as_raw_fd()).unwrap(),
                stream.as_raw_fd(),
            ));
            let mut buf = [0u8; 64];
            let n = stream.read(&mut buf).unwrap();
            stream.write_all(&buf[..n]).unwrap();
        })
        .unwrap();

        let r = reply.clone();
        rt.dispatch(move || {
            let mut stream = CoStream::connect(addr).unwrap();
            stream.write_all(b"ping").unwrap();
            let mut buf = [0u8; 64];
            let n = stream.read(&mut buf).unwrap();
            r.borrow_mut().extend_from_slice(&buf[..n]);
        })
        .unwrap();

        rt.run_until_idle();
        assert_eq!(&reply.borrow()[..], b"ping");
        let (nonblocking, fd) = (*accepted_fd.borrow()).unwrap();
        assert!(fd >= 0);
        assert!(nonblocking);
    }

    #[test]
    fn test_connect_refused() {
        let rt = test_runtime();
        // Grab a free port, then close it
        let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let outcome = Rc::new(RefCell::new(None));

        let o = outcome.clone();
        rt.dispatch(move || {
            *o.borrow_mut() = Some(CoStream::connect(addr).map(|_| ()).map_err(|e| e.kind()));
        })
        .unwrap();

        rt.run_until_idle();
        assert_eq!(*outcome.borrow(), Some(Err(io::ErrorKind::ConnectionRefused)));
    }

    #[test]
    fn test_accept_timeout_maps_to_timed_out() {
        let config = RuntimeConfig::new()
            .max_coroutines(4)
            .stack_size(256 * 1024)
            .accept_timeout(Duration::from_millis(20));
        let rt = Runtime::new(config).unwrap();
        let listener = CoListener::bind("127.0.0.1:0").unwrap();
        let kind = Rc::new(RefCell::new(None));

        let k = kind.clone();
        rt.dispatch(move || {
            *k.borrow_mut() = listener.accept().err().map(|e| e.kind());
        })
        .unwrap();

        rt.run_until_idle();
        assert_eq!(*kind.borrow(), Some(io::ErrorKind::TimedOut));
    }
}
