//! End-to-end scenarios over real sockets: TCP and UDP listeners, the
//! dispatcher, the work queue, the database worker and a backend store
//! all running together.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

use nmdb::backend::{BackendKind, Store};
use nmdb::cache::CHAINLEN;
use nmdb::dbloop;
use nmdb::proto::*;
use nmdb::server::{tcp, udp};
use nmdb::settings::Settings;
use nmdb::state::ServerState;

struct TestServer {
    srv: Arc<ServerState>,
    tcp_addr: SocketAddr,
    udp_addr: SocketAddr,
}

async fn start(backend: BackendKind, cache_entries: usize) -> TestServer {
    let mut settings = Settings::default();
    settings.cache_entries = cache_entries;
    let srv = Arc::new(ServerState::new(settings));

    let store = Store::open(backend, Path::new("unused")).unwrap();
    dbloop::spawn(Arc::clone(&srv), store).unwrap();

    let listener = tcp::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let tcp_addr = listener.local_addr().unwrap();
    tokio::spawn(tcp::serve(Arc::clone(&srv), listener));

    let socket = udp::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let udp_addr = socket.local_addr().unwrap();
    tokio::spawn(udp::serve(Arc::clone(&srv), Arc::new(socket)));

    TestServer {
        srv,
        tcp_addr,
        udp_addr,
    }
}

async fn read_reply(stream: &mut TcpStream) -> (u16, Vec<u8>, u32) {
    let mut lenb = [0u8; 4];
    timeout(Duration::from_secs(5), stream.read_exact(&mut lenb))
        .await
        .expect("timed out waiting for a reply")
        .unwrap();
    let total = u32::from_be_bytes(lenb) as usize;
    let mut rest = vec![0u8; total - 4];
    stream.read_exact(&mut rest).await.unwrap();
    let rep = parse_reply(&rest).unwrap();
    (rep.code, rep.payload.to_vec(), rep.id)
}

/// Payload of a value reply, with its size field checked and stripped.
fn value_of(payload: &[u8]) -> &[u8] {
    let size = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
    assert_eq!(size, payload.len() - 4);
    &payload[4..]
}

#[tokio::test]
async fn sync_set_then_get() {
    let ts = start(BackendKind::Memory, 1024).await;
    let mut c = TcpStream::connect(ts.tcp_addr).await.unwrap();

    c.write_all(&build_set_request(true, 1, FLAGS_SYNC, b"x", b"1"))
        .await
        .unwrap();
    let (code, _, id) = read_reply(&mut c).await;
    assert_eq!((code, id), (REP_OK, 1));

    c.write_all(&build_key_request(true, 2, REQ_GET, 0, b"x"))
        .await
        .unwrap();
    let (code, payload, _) = read_reply(&mut c).await;
    assert_eq!(code, REP_CACHE_HIT);
    assert_eq!(value_of(&payload), b"1");
}

#[tokio::test]
async fn durable_get_falls_through_to_backend() {
    let ts = start(BackendKind::Memory, 1024).await;
    let mut c = TcpStream::connect(ts.tcp_addr).await.unwrap();

    c.write_all(&build_set_request(true, 1, FLAGS_SYNC, b"k", b"stored"))
        .await
        .unwrap();
    read_reply(&mut c).await;

    // Drop the key from the cache tier only, then read durably: the
    // worker must serve it from the backend.
    c.write_all(&build_key_request(true, 2, REQ_DEL, FLAGS_CACHE_ONLY, b"k"))
        .await
        .unwrap();
    let (code, _, _) = read_reply(&mut c).await;
    assert_eq!(code, REP_OK);

    c.write_all(&build_key_request(true, 3, REQ_GET, 0, b"k"))
        .await
        .unwrap();
    let (code, payload, id) = read_reply(&mut c).await;
    assert_eq!((code, id), (REP_OK, 3));
    assert_eq!(value_of(&payload), b"stored");
}

#[tokio::test]
async fn cache_only_data_survives_a_dead_backend() {
    // The null backend stores nothing at all; the cache tier still
    // serves its own writes.
    let ts = start(BackendKind::Null, 1024).await;
    let mut c = TcpStream::connect(ts.tcp_addr).await.unwrap();

    c.write_all(&build_set_request(true, 1, FLAGS_CACHE_ONLY, b"x", b"1"))
        .await
        .unwrap();
    read_reply(&mut c).await;

    c.write_all(&build_key_request(true, 2, REQ_GET, FLAGS_CACHE_ONLY, b"x"))
        .await
        .unwrap();
    let (code, payload, _) = read_reply(&mut c).await;
    assert_eq!(code, REP_CACHE_HIT);
    assert_eq!(value_of(&payload), b"1");

    // But a durable read honestly reports what the backend knows.
    c.write_all(&build_key_request(true, 3, REQ_GET, 0, b"y"))
        .await
        .unwrap();
    let (code, _, _) = read_reply(&mut c).await;
    assert_eq!(code, REP_NOTIN);
}

#[tokio::test]
async fn filling_one_bucket_evicts_the_oldest() {
    // A cache of CHAINLEN entries has exactly one bucket, so every key
    // collides and the fifth insert evicts the first.
    let ts = start(BackendKind::Memory, CHAINLEN).await;
    let mut c = TcpStream::connect(ts.tcp_addr).await.unwrap();

    for (i, key) in [b"k1", b"k2", b"k3", b"k4", b"k5"].iter().enumerate() {
        c.write_all(&build_set_request(
            true,
            i as u32 + 1,
            FLAGS_CACHE_ONLY,
            *key,
            b"v",
        ))
        .await
        .unwrap();
        let (code, _, _) = read_reply(&mut c).await;
        assert_eq!(code, REP_OK);
    }

    c.write_all(&build_key_request(true, 9, REQ_GET, FLAGS_CACHE_ONLY, b"k1"))
        .await
        .unwrap();
    let (code, _, _) = read_reply(&mut c).await;
    assert_eq!(code, REP_CACHE_MISS);
}

#[tokio::test]
async fn incr_formats_the_stored_counter() {
    let ts = start(BackendKind::Memory, 1024).await;
    let mut c = TcpStream::connect(ts.tcp_addr).await.unwrap();

    c.write_all(&build_set_request(true, 1, FLAGS_SYNC, b"n", b"42\0"))
        .await
        .unwrap();
    read_reply(&mut c).await;

    c.write_all(&build_incr_request(true, 2, 0, b"n", 8))
        .await
        .unwrap();
    let (code, payload, _) = read_reply(&mut c).await;
    assert_eq!(code, REP_OK);
    assert_eq!(value_of(&payload), &50i64.to_be_bytes());

    // The stored representation is the padded 24-byte string.
    c.write_all(&build_key_request(true, 3, REQ_GET, 0, b"n"))
        .await
        .unwrap();
    let (code, payload, _) = read_reply(&mut c).await;
    assert_eq!(code, REP_CACHE_HIT);
    let stored = value_of(&payload);
    assert_eq!(stored.len(), 24);
    assert_eq!(&stored[..23], format!("{:>23}", 50).as_bytes());
    assert_eq!(stored[23], 0);
}

#[tokio::test]
async fn cas_happy_and_sad_paths() {
    let ts = start(BackendKind::Memory, 1024).await;
    let mut c = TcpStream::connect(ts.tcp_addr).await.unwrap();

    c.write_all(&build_set_request(true, 1, FLAGS_SYNC, b"c", b"A"))
        .await
        .unwrap();
    read_reply(&mut c).await;

    c.write_all(&build_cas_request(true, 2, 0, b"c", b"B", b"Z"))
        .await
        .unwrap();
    let (code, _, _) = read_reply(&mut c).await;
    assert_eq!(code, REP_NOMATCH);

    c.write_all(&build_key_request(true, 3, REQ_GET, 0, b"c"))
        .await
        .unwrap();
    let (_, payload, _) = read_reply(&mut c).await;
    assert_eq!(value_of(&payload), b"A");

    c.write_all(&build_cas_request(true, 4, 0, b"c", b"A", b"Z"))
        .await
        .unwrap();
    let (code, _, _) = read_reply(&mut c).await;
    assert_eq!(code, REP_OK);

    c.write_all(&build_key_request(true, 5, REQ_GET, 0, b"c"))
        .await
        .unwrap();
    let (_, payload, _) = read_reply(&mut c).await;
    assert_eq!(value_of(&payload), b"Z");
}

#[tokio::test]
async fn async_set_is_immediately_visible() {
    let ts = start(BackendKind::Memory, 1024).await;
    let mut c = TcpStream::connect(ts.tcp_addr).await.unwrap();

    // The async write is acknowledged before the backend applies it,
    // and the new value is already observable through the cache.
    c.write_all(&build_set_request(true, 1, 0, b"k", b"fresh"))
        .await
        .unwrap();
    let (code, _, _) = read_reply(&mut c).await;
    assert_eq!(code, REP_OK);

    c.write_all(&build_key_request(true, 2, REQ_GET, 0, b"k"))
        .await
        .unwrap();
    let (code, payload, _) = read_reply(&mut c).await;
    assert_eq!(code, REP_CACHE_HIT);
    assert_eq!(value_of(&payload), b"fresh");
    assert_eq!(ts.srv.stats.db_set.get(), 1);
}

#[tokio::test]
async fn same_connection_operations_apply_in_order() {
    let ts = start(BackendKind::Memory, 1024).await;
    let mut c = TcpStream::connect(ts.tcp_addr).await.unwrap();

    // Fire a burst of writes to one key without waiting, then check
    // the replies come back in order and the last write won.
    let mut batch = Vec::new();
    for i in 0..10u32 {
        let val = format!("v{}", i);
        batch.extend_from_slice(&build_set_request(
            true,
            i + 1,
            FLAGS_CACHE_ONLY,
            b"k",
            val.as_bytes(),
        ));
    }
    c.write_all(&batch).await.unwrap();
    for i in 0..10u32 {
        let (code, _, id) = read_reply(&mut c).await;
        assert_eq!((code, id), (REP_OK, i + 1));
    }

    c.write_all(&build_key_request(true, 99, REQ_GET, FLAGS_CACHE_ONLY, b"k"))
        .await
        .unwrap();
    let (_, payload, _) = read_reply(&mut c).await;
    assert_eq!(value_of(&payload), b"v9");
}

#[tokio::test]
async fn stats_over_udp() {
    let ts = start(BackendKind::Memory, 1024).await;

    // Generate one cache-only set over TCP first.
    let mut c = TcpStream::connect(ts.tcp_addr).await.unwrap();
    c.write_all(&build_set_request(true, 1, FLAGS_CACHE_ONLY, b"k", b"v"))
        .await
        .unwrap();
    read_reply(&mut c).await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.connect(ts.udp_addr).await.unwrap();
    client.send(&build_stats_request(false, 7)).await.unwrap();

    let mut buf = vec![0u8; 4096];
    let n = timeout(Duration::from_secs(5), client.recv(&mut buf))
        .await
        .expect("timed out waiting for stats")
        .unwrap();
    let rep = parse_reply(&buf[..n]).unwrap();
    assert_eq!((rep.id, rep.code), (7, REP_OK));
    assert_eq!(rep.payload.len(), STATS_COUNTERS * 8);

    let mut counters = [0u64; STATS_COUNTERS];
    for (i, chunk) in rep.payload.chunks_exact(8).enumerate() {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(chunk);
        counters[i] = u64::from_be_bytes(raw);
    }
    assert_eq!(counters[1], 1, "cache_set");
    assert_eq!(counters[15], 1, "msg_tcp");
    assert_eq!(counters[16], 1, "msg_udp");
}

#[tokio::test]
async fn sync_del_round_trips_through_the_worker() {
    let ts = start(BackendKind::Memory, 1024).await;
    let mut c = TcpStream::connect(ts.tcp_addr).await.unwrap();

    c.write_all(&build_set_request(true, 1, FLAGS_SYNC, b"k", b"v"))
        .await
        .unwrap();
    read_reply(&mut c).await;

    c.write_all(&build_key_request(true, 2, REQ_DEL, FLAGS_SYNC, b"k"))
        .await
        .unwrap();
    let (code, _, _) = read_reply(&mut c).await;
    assert_eq!(code, REP_OK);

    // Deleting again reports the backend miss.
    c.write_all(&build_key_request(true, 3, REQ_DEL, FLAGS_SYNC, b"k"))
        .await
        .unwrap();
    let (code, _, _) = read_reply(&mut c).await;
    assert_eq!(code, REP_NOTIN);
}

#[tokio::test]
async fn version_mismatch_over_udp() {
    let ts = start(BackendKind::Memory, 1024).await;
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.connect(ts.udp_addr).await.unwrap();

    let mut msg = build_stats_request(false, 5).to_vec();
    msg[0] = (msg[0] & 0x0f) | (9 << 4);
    client.send(&msg).await.unwrap();

    let mut buf = vec![0u8; 64];
    let n = timeout(Duration::from_secs(5), client.recv(&mut buf))
        .await
        .expect("timed out waiting for the error")
        .unwrap();
    let rep = parse_reply(&buf[..n]).unwrap();
    assert_eq!((rep.id, rep.code), (5, REP_ERR));
    assert_eq!(rep.payload, &ERR_VER.to_be_bytes());
}
