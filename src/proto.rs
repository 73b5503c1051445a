//! Wire protocol codec.
//!
//! Every request and reply is a self-describing frame. Datagram
//! transports carry one complete message per datagram and the codec
//! starts at byte 0; the stream transport prefixes each message with a
//! 4-byte network-order total length (inclusive of the prefix itself)
//! and the codec starts right after it.
//!
//! Request header, 8 bytes: word 0 packs the protocol version in the 4
//! most-significant bits and the request id in the low 28; then a 16-bit
//! command and a 16-bit flag bitmap. Reply header, 8 bytes: the id
//! echoed verbatim, a 16-bit reply code, and two reserved zero bytes.
//! All integers are network byte order.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Protocol version carried in the header's high nibble.
pub const PROTO_VER: u8 = 1;

/// Request opcodes.
pub const REQ_GET: u16 = 0x101;
pub const REQ_SET: u16 = 0x102;
pub const REQ_DEL: u16 = 0x103;
pub const REQ_CAS: u16 = 0x104;
pub const REQ_INCR: u16 = 0x105;
pub const REQ_STATS: u16 = 0x106;
pub const REQ_FIRSTKEY: u16 = 0x107;
pub const REQ_NEXTKEY: u16 = 0x108;

/// Request flags. Bits other than these are ignored.
pub const FLAGS_CACHE_ONLY: u16 = 1;
pub const FLAGS_SYNC: u16 = 2;

/// Reply codes.
pub const REP_ERR: u16 = 0x800;
pub const REP_CACHE_HIT: u16 = 0x801;
pub const REP_CACHE_MISS: u16 = 0x802;
pub const REP_OK: u16 = 0x803;
pub const REP_NOTIN: u16 = 0x804;
pub const REP_NOMATCH: u16 = 0x805;

/// Error subcodes carried after an ERR reply header.
pub const ERR_VER: u32 = 0x101;
pub const ERR_SEND: u32 = 0x102;
pub const ERR_BROKEN: u32 = 0x103;
pub const ERR_UNKREQ: u32 = 0x104;
pub const ERR_MEM: u32 = 0x105;
pub const ERR_DB: u32 = 0x106;
pub const ERR_RO: u32 = 0x107;

/// Largest legal message, and the bound on every size field inside one.
pub const MAX_MSG_SIZE: usize = 65536;
/// Smallest legal stream frame: length prefix plus the 8-byte header.
pub const MIN_STREAM_FRAME: usize = 12;
/// Receive buffer size, a little over the maximum message.
pub const RECV_BUF_SIZE: usize = 68 * 1024;
/// Number of counters in a STATS reply.
pub const STATS_COUNTERS: usize = 21;

/// Header decode failures.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum HeaderError {
    #[error("message shorter than the request header")]
    TooShort,
    /// Version nibble did not match; carries the id so the error reply
    /// can still echo it.
    #[error("protocol version mismatch")]
    Version { id: u32 },
}

/// Payload decode failures: a size field overruns the remaining payload
/// or exceeds the per-message bound.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("broken request payload")]
pub struct BrokenPayload;

/// A decoded request header with its raw payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request<'a> {
    pub id: u32,
    pub cmd: u16,
    pub flags: u16,
    pub payload: &'a [u8],
}

/// Decode the 8-byte request header from a complete message (stream
/// length prefix already stripped).
pub fn parse_request(msg: &[u8]) -> Result<Request<'_>, HeaderError> {
    if msg.len() < 8 {
        return Err(HeaderError::TooShort);
    }
    let word0 = u32::from_be_bytes([msg[0], msg[1], msg[2], msg[3]]);
    let ver = (word0 >> 28) as u8;
    let id = word0 & 0x0fff_ffff;
    if ver != PROTO_VER {
        return Err(HeaderError::Version { id });
    }
    let cmd = u16::from_be_bytes([msg[4], msg[5]]);
    let flags = u16::from_be_bytes([msg[6], msg[7]]);
    Ok(Request {
        id,
        cmd,
        flags,
        payload: &msg[8..],
    })
}

fn read_size(payload: &[u8], at: usize) -> Result<usize, BrokenPayload> {
    if payload.len() < at + 4 {
        return Err(BrokenPayload);
    }
    let n = u32::from_be_bytes([
        payload[at],
        payload[at + 1],
        payload[at + 2],
        payload[at + 3],
    ]) as usize;
    if n > MAX_MSG_SIZE {
        return Err(BrokenPayload);
    }
    Ok(n)
}

/// GET/DEL payload: `ksize || key`.
pub fn parse_key(payload: &[u8]) -> Result<&[u8], BrokenPayload> {
    let ksize = read_size(payload, 0)?;
    if payload.len() < 4 + ksize {
        return Err(BrokenPayload);
    }
    Ok(&payload[4..4 + ksize])
}

/// SET payload: `ksize || vsize || key || value`.
pub fn parse_key_value(payload: &[u8]) -> Result<(&[u8], &[u8]), BrokenPayload> {
    let ksize = read_size(payload, 0)?;
    let vsize = read_size(payload, 4)?;
    if ksize + vsize > MAX_MSG_SIZE || payload.len() < 8 + ksize + vsize {
        return Err(BrokenPayload);
    }
    let key = &payload[8..8 + ksize];
    let val = &payload[8 + ksize..8 + ksize + vsize];
    Ok((key, val))
}

/// CAS payload: `ksize || ovsize || nvsize || key || oldval || newval`.
pub fn parse_cas(payload: &[u8]) -> Result<(&[u8], &[u8], &[u8]), BrokenPayload> {
    let ksize = read_size(payload, 0)?;
    let ovsize = read_size(payload, 4)?;
    let nvsize = read_size(payload, 8)?;
    if ksize + ovsize + nvsize > MAX_MSG_SIZE
        || payload.len() < 12 + ksize + ovsize + nvsize
    {
        return Err(BrokenPayload);
    }
    let key = &payload[12..12 + ksize];
    let oldval = &payload[12 + ksize..12 + ksize + ovsize];
    let newval = &payload[12 + ksize + ovsize..12 + ksize + ovsize + nvsize];
    Ok((key, oldval, newval))
}

/// INCR payload: `ksize || key || delta` with an 8-byte signed delta.
pub fn parse_incr(payload: &[u8]) -> Result<(&[u8], i64), BrokenPayload> {
    let ksize = read_size(payload, 0)?;
    if ksize + 8 > MAX_MSG_SIZE || payload.len() < 4 + ksize + 8 {
        return Err(BrokenPayload);
    }
    let key = &payload[4..4 + ksize];
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&payload[4 + ksize..4 + ksize + 8]);
    Ok((key, i64::from_be_bytes(raw)))
}

fn frame(stream: bool, body_len: usize, fill: impl FnOnce(&mut BytesMut)) -> Bytes {
    let prefix = if stream { 4 } else { 0 };
    let mut buf = BytesMut::with_capacity(prefix + body_len);
    if stream {
        buf.put_u32((4 + body_len) as u32);
    }
    fill(&mut buf);
    buf.freeze()
}

fn put_reply_header(buf: &mut BytesMut, id: u32, code: u16) {
    buf.put_u32(id);
    buf.put_u16(code);
    buf.put_u16(0);
}

/// A reply that is just a code.
pub fn build_mini_reply(stream: bool, id: u32, code: u16) -> Bytes {
    frame(stream, 8, |buf| put_reply_header(buf, id, code))
}

/// An ERR reply with its subcode word.
pub fn build_err_reply(stream: bool, id: u32, err: u32) -> Bytes {
    frame(stream, 12, |buf| {
        put_reply_header(buf, id, REP_ERR);
        buf.put_u32(err);
    })
}

/// A value-bearing reply: header, value size, value bytes.
pub fn build_value_reply(stream: bool, id: u32, code: u16, val: &[u8]) -> Bytes {
    frame(stream, 12 + val.len(), |buf| {
        put_reply_header(buf, id, code);
        buf.put_u32(val.len() as u32);
        buf.put_slice(val);
    })
}

/// A STATS reply: header plus the packed counter vector.
pub fn build_stats_reply(stream: bool, id: u32, counters: &[u64; STATS_COUNTERS]) -> Bytes {
    frame(stream, 8 + STATS_COUNTERS * 8, |buf| {
        put_reply_header(buf, id, REP_OK);
        for c in counters {
            buf.put_u64(*c);
        }
    })
}

fn put_request_header(buf: &mut BytesMut, id: u32, cmd: u16, flags: u16) {
    buf.put_u32(((PROTO_VER as u32) << 28) | (id & 0x0fff_ffff));
    buf.put_u16(cmd);
    buf.put_u16(flags);
}

/// Client-side encoder for GET and DEL requests.
pub fn build_key_request(stream: bool, id: u32, cmd: u16, flags: u16, key: &[u8]) -> Bytes {
    frame(stream, 12 + key.len(), |buf| {
        put_request_header(buf, id, cmd, flags);
        buf.put_u32(key.len() as u32);
        buf.put_slice(key);
    })
}

/// Client-side encoder for SET requests.
pub fn build_set_request(stream: bool, id: u32, flags: u16, key: &[u8], val: &[u8]) -> Bytes {
    frame(stream, 16 + key.len() + val.len(), |buf| {
        put_request_header(buf, id, REQ_SET, flags);
        buf.put_u32(key.len() as u32);
        buf.put_u32(val.len() as u32);
        buf.put_slice(key);
        buf.put_slice(val);
    })
}

/// Client-side encoder for CAS requests.
pub fn build_cas_request(
    stream: bool,
    id: u32,
    flags: u16,
    key: &[u8],
    oldval: &[u8],
    newval: &[u8],
) -> Bytes {
    frame(
        stream,
        20 + key.len() + oldval.len() + newval.len(),
        |buf| {
            put_request_header(buf, id, REQ_CAS, flags);
            buf.put_u32(key.len() as u32);
            buf.put_u32(oldval.len() as u32);
            buf.put_u32(newval.len() as u32);
            buf.put_slice(key);
            buf.put_slice(oldval);
            buf.put_slice(newval);
        },
    )
}

/// Client-side encoder for INCR requests.
pub fn build_incr_request(stream: bool, id: u32, flags: u16, key: &[u8], delta: i64) -> Bytes {
    frame(stream, 20 + key.len(), |buf| {
        put_request_header(buf, id, REQ_INCR, flags);
        buf.put_u32(key.len() as u32);
        buf.put_slice(key);
        buf.put_i64(delta);
    })
}

/// Client-side encoder for STATS requests.
pub fn build_stats_request(stream: bool, id: u32) -> Bytes {
    frame(stream, 8, |buf| {
        put_request_header(buf, id, REQ_STATS, 0);
    })
}

/// A decoded reply, used by clients and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply<'a> {
    pub id: u32,
    pub code: u16,
    pub payload: &'a [u8],
}

/// Decode a reply (stream length prefix already stripped).
pub fn parse_reply(msg: &[u8]) -> Result<Reply<'_>, BrokenPayload> {
    if msg.len() < 8 {
        return Err(BrokenPayload);
    }
    let id = u32::from_be_bytes([msg[0], msg[1], msg[2], msg[3]]);
    let code = u16::from_be_bytes([msg[4], msg[5]]);
    Ok(Reply {
        id,
        code,
        payload: &msg[8..],
    })
}
