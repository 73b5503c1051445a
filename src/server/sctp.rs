//! SCTP listener: sequenced packets over a one-to-many socket.
//!
//! A SOCK_SEQPACKET socket in one-to-many style carries whole messages
//! from any number of peers over one fd, so it is handled exactly like
//! a datagram listener even though associations are connection-shaped
//! underneath.

use std::io;
use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::sync::Arc;

use super::raw::{self, RawMessageSocket};
use crate::dispatch::dispatch;
use crate::proto::RECV_BUF_SIZE;
use crate::reply::Replier;
use crate::state::ServerState;

const LISTEN_BACKLOG: libc::c_int = 1024;

/// Bind the SCTP listener.
pub fn bind(addr: SocketAddr) -> io::Result<RawMessageSocket> {
    let SocketAddr::V4(v4) = addr else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "sctp listener requires an IPv4 address",
        ));
    };
    let fd = raw::socket_fd(libc::AF_INET, libc::SOCK_SEQPACKET, libc::IPPROTO_SCTP)?;
    let sa = libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: v4.port().to_be(),
        sin_addr: libc::in_addr {
            s_addr: u32::from(*v4.ip()).to_be(),
        },
        sin_zero: [0; 8],
    };
    unsafe {
        raw::bind_fd(
            fd.as_raw_fd(),
            &sa as *const _ as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )?;
    }
    if unsafe { libc::listen(fd.as_raw_fd(), LISTEN_BACKLOG) } < 0 {
        return Err(io::Error::last_os_error());
    }
    RawMessageSocket::new(fd)
}

/// Receive loop: one message per readiness event, fed to the codec.
pub async fn serve(srv: Arc<ServerState>, socket: Arc<RawMessageSocket>) {
    let mut buf = vec![0u8; RECV_BUF_SIZE];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((0, _)) => continue,
            Ok((n, peer)) => {
                srv.stats.msg_sctp.inc();
                let replier = Replier::sctp(Arc::clone(&socket), peer);
                dispatch(&srv, &buf[..n], replier);
            }
            Err(e) => {
                log::warn!("sctp recv error: {}", e);
            }
        }
    }
}
