//! TIPC listener: reliable datagrams with cluster name addressing.
//!
//! The server binds a name sequence `{TIPC_SERVER_TYPE, lower..upper}`
//! with cluster scope on a SOCK_RDM socket. Each datagram is one
//! complete message.

use std::io;
use std::os::fd::AsRawFd;
use std::sync::Arc;

use super::raw::{self, RawMessageSocket};
use crate::dispatch::dispatch;
use crate::proto::RECV_BUF_SIZE;
use crate::reply::Replier;
use crate::state::ServerState;

/// TIPC server type for nmdb name sequences.
pub const TIPC_SERVER_TYPE: u32 = 26001;

// From <linux/tipc.h>; libc carries no TIPC bindings.
const AF_TIPC: libc::c_int = 30;
const TIPC_ADDR_NAMESEQ: u8 = 1;
const TIPC_CLUSTER_SCOPE: libc::c_schar = 2;

/// `struct sockaddr_tipc` with the name-sequence arm of its address
/// union. Layout matches the kernel ABI: 4 bytes of family/addrtype/
/// scope followed by the 12-byte union.
#[repr(C)]
struct SockaddrTipcNameSeq {
    family: libc::sa_family_t,
    addrtype: u8,
    scope: libc::c_schar,
    stype: u32,
    lower: u32,
    upper: u32,
}

/// Bind the TIPC listener for the given instance range.
pub fn bind(lower: u32, upper: u32) -> io::Result<RawMessageSocket> {
    let fd = raw::socket_fd(AF_TIPC, libc::SOCK_RDM, 0)?;
    let addr = SockaddrTipcNameSeq {
        family: AF_TIPC as libc::sa_family_t,
        addrtype: TIPC_ADDR_NAMESEQ,
        scope: TIPC_CLUSTER_SCOPE,
        stype: TIPC_SERVER_TYPE,
        lower,
        upper,
    };
    unsafe {
        raw::bind_fd(
            fd.as_raw_fd(),
            &addr as *const _ as *const libc::sockaddr,
            std::mem::size_of::<SockaddrTipcNameSeq>() as libc::socklen_t,
        )?;
    }
    RawMessageSocket::new(fd)
}

/// Receive loop: one message per readiness event, fed to the codec.
pub async fn serve(srv: Arc<ServerState>, socket: Arc<RawMessageSocket>) {
    let mut buf = vec![0u8; RECV_BUF_SIZE];
    loop {
        match socket.recv_from(&mut buf).await {
            // A zero-length read is the return of an undeliverable
            // message; ignore it.
            Ok((0, _)) => continue,
            Ok((n, peer)) => {
                srv.stats.msg_tipc.inc();
                let replier = Replier::tipc(Arc::clone(&socket), peer);
                dispatch(&srv, &buf[..n], replier);
            }
            Err(e) => {
                log::warn!("tipc recv error: {}", e);
            }
        }
    }
}
