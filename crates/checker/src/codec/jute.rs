//! ZooKeeper client protocol records (jute encoding).
//!
//! Every frame on the wire is a big-endian `i32` length followed by the
//! record; framing is left to `LengthDelimitedCodec`, this module only
//! builds and parses the records a read-only health check needs.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;

/// Four-letter "are you ok" command and its healthy reply
pub const RUOK: &[u8] = b"ruok";
pub const IMOK: &str = "imok";

pub const OP_GET_DATA: i32 = 4;
pub const OP_CLOSE_SESSION: i32 = -11;

const PASSWORD_LEN: usize = 16;

fn truncated(what: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("truncated {} record", what),
    )
}

fn get_i32(buf: &mut &[u8], what: &str) -> io::Result<i32> {
    if buf.remaining() < 4 {
        return Err(truncated(what));
    }
    Ok(buf.get_i32())
}

fn get_i64(buf: &mut &[u8], what: &str) -> io::Result<i64> {
    if buf.remaining() < 8 {
        return Err(truncated(what));
    }
    Ok(buf.get_i64())
}

/// A length-prefixed buffer; `-1` encodes null
fn get_buffer(buf: &mut &[u8], what: &str) -> io::Result<Option<Bytes>> {
    let len = get_i32(buf, what)?;
    if len < 0 {
        return Ok(None);
    }
    let len = len as usize;
    if buf.remaining() < len {
        return Err(truncated(what));
    }
    Ok(Some(buf.copy_to_bytes(len)))
}

/// Session handshake sent first on every connection
pub fn connect_request(session_timeout_ms: i32) -> Bytes {
    let mut buf = BytesMut::with_capacity(44);
    buf.put_i32(0); // protocol version
    buf.put_i64(0); // last zxid seen
    buf.put_i32(session_timeout_ms);
    buf.put_i64(0); // session id
    buf.put_i32(PASSWORD_LEN as i32);
    buf.put_bytes(0, PASSWORD_LEN);
    buf.freeze()
}

/// Server's answer to [`connect_request`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectResponse {
    pub protocol_version: i32,
    pub timeout_ms: i32,
    pub session_id: i64,
}

impl ConnectResponse {
    pub fn parse(mut record: &[u8]) -> io::Result<Self> {
        let protocol_version = get_i32(&mut record, "connect response")?;
        let timeout_ms = get_i32(&mut record, "connect response")?;
        let session_id = get_i64(&mut record, "connect response")?;
        get_buffer(&mut record, "connect response")?;
        Ok(Self {
            protocol_version,
            timeout_ms,
            session_id,
        })
    }

    /// A non-positive negotiated timeout means the server refused the session
    pub fn is_established(&self) -> bool {
        self.timeout_ms > 0
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(40);
        buf.put_i32(self.protocol_version);
        buf.put_i32(self.timeout_ms);
        buf.put_i64(self.session_id);
        buf.put_i32(PASSWORD_LEN as i32);
        buf.put_bytes(0, PASSWORD_LEN);
        buf.freeze()
    }
}

/// `getData(path, watch = false)`
pub fn get_data_request(xid: i32, path: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(13 + path.len());
    buf.put_i32(xid);
    buf.put_i32(OP_GET_DATA);
    buf.put_i32(path.len() as i32);
    buf.put_slice(path.as_bytes());
    buf.put_u8(0);
    buf.freeze()
}

pub fn close_session_request(xid: i32) -> Bytes {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_i32(xid);
    buf.put_i32(OP_CLOSE_SESSION);
    buf.freeze()
}

/// Header preceding every reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyHeader {
    pub xid: i32,
    pub zxid: i64,
    pub err: i32,
}

impl ReplyHeader {
    pub fn parse(record: &mut &[u8]) -> io::Result<Self> {
        Ok(Self {
            xid: get_i32(record, "reply header")?,
            zxid: get_i64(record, "reply header")?,
            err: get_i32(record, "reply header")?,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32(self.xid);
        buf.put_i64(self.zxid);
        buf.put_i32(self.err);
    }
}

/// Data of a successful getData reply; the trailing Stat is ignored
pub fn parse_get_data_body(record: &mut &[u8]) -> io::Result<Option<Bytes>> {
    get_buffer(record, "getData response")
}

/// Name of a server error code
pub fn error_name(code: i32) -> &'static str {
    match code {
        0 => "Ok",
        -1 => "SystemError",
        -4 => "ConnectionLoss",
        -7 => "OperationTimeout",
        -101 => "NoNode",
        -102 => "NoAuth",
        -112 => "SessionExpired",
        -115 => "AuthFailed",
        _ => "Unknown",
    }
}
