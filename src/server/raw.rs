//! Message-oriented sockets outside the std/tokio families.
//!
//! The TIPC and SCTP listeners need socket domains tokio has no wrapper
//! for, so they are created with raw `libc` calls and driven through
//! [`AsyncFd`]. Receiving happens on the event loop; sending is plain
//! non-blocking `sendto`, safe from any thread, which is what lets the
//! database worker reply directly.

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

/// A peer address exactly as the kernel returned it, kept raw so the
/// reply path can echo it back through `sendto` untouched.
#[derive(Clone, Copy)]
pub struct RawAddr {
    storage: libc::sockaddr_storage,
    len: libc::socklen_t,
}

struct MsgFd(OwnedFd);

impl AsRawFd for MsgFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

impl MsgFd {
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, RawAddr)> {
        let mut addr = RawAddr {
            storage: unsafe { mem::zeroed() },
            len: mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t,
        };
        let n = unsafe {
            libc::recvfrom(
                self.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
                &mut addr.storage as *mut _ as *mut libc::sockaddr,
                &mut addr.len,
            )
        };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok((n as usize, addr))
        }
    }

    fn send_to(&self, buf: &[u8], addr: &RawAddr) -> io::Result<usize> {
        let n = unsafe {
            libc::sendto(
                self.as_raw_fd(),
                buf.as_ptr() as *const libc::c_void,
                buf.len(),
                0,
                &addr.storage as *const _ as *const libc::sockaddr,
                addr.len,
            )
        };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }
}

/// A non-blocking message socket registered with the event loop.
pub struct RawMessageSocket {
    io: AsyncFd<MsgFd>,
}

impl RawMessageSocket {
    /// Wrap an already-bound, message-oriented socket.
    pub fn new(fd: OwnedFd) -> io::Result<RawMessageSocket> {
        set_nonblocking(fd.as_raw_fd())?;
        let io = AsyncFd::with_interest(MsgFd(fd), Interest::READABLE)?;
        Ok(RawMessageSocket { io })
    }

    /// Receive one datagram, waiting for readiness on the event loop.
    pub async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, RawAddr)> {
        loop {
            let mut guard = self.io.readable().await?;
            match guard.try_io(|inner| inner.get_ref().recv_from(buf)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    /// Non-blocking send, usable from any thread.
    pub fn send_to(&self, buf: &[u8], addr: &RawAddr) -> io::Result<usize> {
        self.io.get_ref().send_to(buf, addr)
    }
}

/// Create a socket fd for the given domain/type/protocol.
pub fn socket_fd(
    domain: libc::c_int,
    ty: libc::c_int,
    protocol: libc::c_int,
) -> io::Result<OwnedFd> {
    let fd = unsafe { libc::socket(domain, ty, protocol) };
    if fd < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }
}

/// Bind a raw address to a socket.
///
/// # Safety
///
/// `addr` must point to a valid sockaddr of at least `len` bytes.
pub unsafe fn bind_fd(
    fd: RawFd,
    addr: *const libc::sockaddr,
    len: libc::socklen_t,
) -> io::Result<()> {
    if libc::bind(fd, addr, len) < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
