//! Reply emission.
//!
//! Each request carries a [`Replier`]: the reply encoder plus a
//! transport-tagged sink for the originating connection. Datagram sinks
//! hold the shared socket and the peer address; stream sinks hold the
//! connection's writer channel. Both kinds are safe to use from the
//! network thread and from the database worker, so whoever performs the
//! authoritative step of a request answers it directly.
//!
//! Passive mode is enforced here: when the flag is set every outbound
//! reply is dropped while state changes proceed as usual.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::UnboundedSender;

use crate::proto;
use crate::state::ServerState;

#[cfg(any(feature = "tipc", feature = "sctp"))]
use crate::server::raw::{RawAddr, RawMessageSocket};

enum ReplySink {
    Udp {
        socket: Arc<UdpSocket>,
        peer: SocketAddr,
    },
    #[cfg(feature = "tipc")]
    Tipc {
        socket: Arc<RawMessageSocket>,
        peer: RawAddr,
    },
    #[cfg(feature = "sctp")]
    Sctp {
        socket: Arc<RawMessageSocket>,
        peer: RawAddr,
    },
    Stream {
        tx: UnboundedSender<Bytes>,
    },
    #[cfg(test)]
    Discard,
}

/// Where and how to answer one request.
pub struct Replier {
    sink: ReplySink,
    /// Request id, echoed verbatim in the reply header. Set by the
    /// dispatcher once the header has been decoded.
    pub id: u32,
}

impl Replier {
    pub fn udp(socket: Arc<UdpSocket>, peer: SocketAddr) -> Replier {
        Replier {
            sink: ReplySink::Udp { socket, peer },
            id: 0,
        }
    }

    #[cfg(feature = "tipc")]
    pub fn tipc(socket: Arc<RawMessageSocket>, peer: RawAddr) -> Replier {
        Replier {
            sink: ReplySink::Tipc { socket, peer },
            id: 0,
        }
    }

    #[cfg(feature = "sctp")]
    pub fn sctp(socket: Arc<RawMessageSocket>, peer: RawAddr) -> Replier {
        Replier {
            sink: ReplySink::Sctp { socket, peer },
            id: 0,
        }
    }

    pub fn stream(tx: UnboundedSender<Bytes>) -> Replier {
        Replier {
            sink: ReplySink::Stream { tx },
            id: 0,
        }
    }

    /// A sink that drops everything; for tests that only care about
    /// state changes.
    #[cfg(test)]
    pub fn discard() -> Replier {
        Replier {
            sink: ReplySink::Discard,
            id: 0,
        }
    }

    /// Whether the sink uses stream framing (length-prefixed replies).
    fn is_stream(&self) -> bool {
        matches!(self.sink, ReplySink::Stream { .. })
    }

    /// A reply that is just a code.
    pub fn reply_mini(&self, srv: &ServerState, code: u16) {
        self.send(srv, proto::build_mini_reply(self.is_stream(), self.id, code));
    }

    /// An error reply with its subcode.
    pub fn reply_err(&self, srv: &ServerState, err: u32) {
        self.send(srv, proto::build_err_reply(self.is_stream(), self.id, err));
    }

    /// A value-bearing reply.
    pub fn reply_value(&self, srv: &ServerState, code: u16, val: &[u8]) {
        self.send(
            srv,
            proto::build_value_reply(self.is_stream(), self.id, code, val),
        );
    }

    /// The STATS counter vector.
    pub fn reply_stats(&self, srv: &ServerState, counters: &[u64; proto::STATS_COUNTERS]) {
        self.send(
            srv,
            proto::build_stats_reply(self.is_stream(), self.id, counters),
        );
    }

    fn send(&self, srv: &ServerState, frame: Bytes) {
        if srv.flags.passive() {
            return;
        }
        match &self.sink {
            ReplySink::Udp { socket, peer } => {
                if let Err(e) = socket.try_send_to(&frame, *peer) {
                    log::warn!("udp send to {} failed: {}", peer, e);
                    let err = proto::build_err_reply(false, self.id, proto::ERR_SEND);
                    let _ = socket.try_send_to(&err, *peer);
                }
            }
            #[cfg(feature = "tipc")]
            ReplySink::Tipc { socket, peer } => {
                if let Err(e) = socket.send_to(&frame, peer) {
                    log::warn!("tipc send failed: {}", e);
                    let err = proto::build_err_reply(false, self.id, proto::ERR_SEND);
                    let _ = socket.send_to(&err, peer);
                }
            }
            #[cfg(feature = "sctp")]
            ReplySink::Sctp { socket, peer } => {
                if let Err(e) = socket.send_to(&frame, peer) {
                    log::warn!("sctp send failed: {}", e);
                    let err = proto::build_err_reply(false, self.id, proto::ERR_SEND);
                    let _ = socket.send_to(&err, peer);
                }
            }
            ReplySink::Stream { tx } => {
                // The connection may already be gone; that is fine, the
                // request was implicitly abandoned with it.
                if tx.send(frame).is_err() {
                    log::debug!("reply for id {} dropped, connection closed", self.id);
                }
            }
            #[cfg(test)]
            ReplySink::Discard => {}
        }
    }
}
