//! UDP listener: connectionless datagrams, one message each.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::dispatch::dispatch;
use crate::proto::RECV_BUF_SIZE;
use crate::reply::Replier;
use crate::state::ServerState;

/// Bind the UDP listener.
pub async fn bind(addr: SocketAddr) -> io::Result<UdpSocket> {
    UdpSocket::bind(addr).await
}

/// Receive loop: one datagram per message, fed to the codec.
pub async fn serve(srv: Arc<ServerState>, socket: Arc<UdpSocket>) {
    let mut buf = vec![0u8; RECV_BUF_SIZE];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((n, peer)) => {
                srv.stats.msg_udp.inc();
                let replier = Replier::udp(Arc::clone(&socket), peer);
                dispatch(&srv, &buf[..n], replier);
            }
            Err(e) => {
                log::warn!("udp recv error: {}", e);
            }
        }
    }
}
