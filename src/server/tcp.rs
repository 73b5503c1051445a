//! TCP listener: a connected byte stream carrying length-prefixed
//! frames.
//!
//! Each accepted connection gets a reader that reassembles frames from
//! however the bytes arrive (a frame split across reads, several frames
//! in one read) and a writer task draining the connection's reply
//! channel, so the dispatcher and the database worker can both answer
//! without interleaving partial writes.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc::unbounded_channel;

use crate::dispatch::dispatch;
use crate::proto::{MAX_MSG_SIZE, MIN_STREAM_FRAME, RECV_BUF_SIZE};
use crate::reply::Replier;
use crate::state::ServerState;

const LISTEN_BACKLOG: u32 = 1024;

/// Bind the TCP listener. Nagle is disabled since replies are small
/// and latency-sensitive.
pub fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

/// Accept loop: each connection runs on its own task.
pub async fn serve(srv: Arc<ServerState>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    log::debug!("set_nodelay failed for {}: {}", peer, e);
                }
                tokio::spawn(connection(Arc::clone(&srv), stream, peer));
            }
            Err(e) => {
                log::warn!("tcp accept error: {}", e);
            }
        }
    }
}

async fn connection(srv: Arc<ServerState>, stream: TcpStream, peer: SocketAddr) {
    let (mut rd, mut wr) = stream.into_split();
    let (tx, mut rx) = unbounded_channel::<Bytes>();

    // All replies for this connection funnel through one writer, so a
    // worker reply never interleaves with a dispatcher reply.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if wr.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    let mut buf = BytesMut::with_capacity(RECV_BUF_SIZE);
    'conn: loop {
        // Drain every complete frame already buffered.
        while buf.len() >= 4 {
            let total = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
            if !(MIN_STREAM_FRAME..=MAX_MSG_SIZE).contains(&total) {
                // A lying length prefix poisons the whole stream; the
                // connection cannot be resynchronized.
                log::debug!("closing {}: invalid frame length {}", peer, total);
                break 'conn;
            }
            if buf.len() < total {
                break;
            }
            let frame = buf.split_to(total).freeze();
            srv.stats.msg_tcp.inc();
            dispatch(&srv, &frame[4..], Replier::stream(tx.clone()));
        }

        match rd.read_buf(&mut buf).await {
            // Orderly shutdown from the peer.
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                log::debug!("read error from {}: {}", peer, e);
                break;
            }
        }
    }

    // Tearing the writer down closes the socket; replies still in
    // flight from the worker fail benignly on the closed channel.
    writer.abort();
}
