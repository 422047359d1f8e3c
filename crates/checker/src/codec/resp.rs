//! RESP (REdis Serialization Protocol) codec.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;
const MAX_DEPTH: usize = 8;

/// A decoded reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Bytes>),
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// Text of a simple or bulk string reply
    pub fn as_text(&self) -> Option<String> {
        match self {
            RespValue::Simple(s) => Some(s.clone()),
            RespValue::Bulk(Some(b)) => Some(String::from_utf8_lossy(b).into_owned()),
            _ => None,
        }
    }
}

/// A command, sent as an array of bulk strings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    args: Vec<Bytes>,
}

impl Command {
    pub fn new(name: &str) -> Self {
        Self {
            args: vec![Bytes::copy_from_slice(name.as_bytes())],
        }
    }

    pub fn arg(mut self, arg: impl AsRef<[u8]>) -> Self {
        self.args.push(Bytes::copy_from_slice(arg.as_ref()));
        self
    }

    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.args[0]).into_owned()
    }
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Codec producing [`RespValue`]s and consuming [`Command`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct RespCodec;

/// Position of the CRLF ending the line that starts at `from`
fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|p| from + p)
}

fn parse_int(line: &[u8]) -> io::Result<i64> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| invalid("malformed integer in reply"))
}

/// Parse one value starting at `pos`. Returns the value and the position
/// after it, or `None` if the buffer does not yet hold a whole value.
fn parse(buf: &[u8], pos: usize, depth: usize) -> io::Result<Option<(RespValue, usize)>> {
    if depth > MAX_DEPTH {
        return Err(invalid("reply nested too deeply"));
    }
    let Some(&marker) = buf.get(pos) else {
        return Ok(None);
    };
    let Some(end) = find_crlf(buf, pos + 1) else {
        return Ok(None);
    };
    let line = &buf[pos + 1..end];
    let next = end + 2;

    let value = match marker {
        b'+' => (RespValue::Simple(String::from_utf8_lossy(line).into_owned()), next),
        b'-' => (RespValue::Error(String::from_utf8_lossy(line).into_owned()), next),
        b':' => (RespValue::Integer(parse_int(line)?), next),
        b'$' => {
            let len = parse_int(line)?;
            if len < 0 {
                (RespValue::Bulk(None), next)
            } else if len > MAX_BULK_LEN {
                return Err(invalid("bulk reply too large"));
            } else {
                let len = len as usize;
                if buf.len() < next + len + 2 {
                    return Ok(None);
                }
                if &buf[next + len..next + len + 2] != b"\r\n" {
                    return Err(invalid("bulk reply missing terminator"));
                }
                let data = Bytes::copy_from_slice(&buf[next..next + len]);
                (RespValue::Bulk(Some(data)), next + len + 2)
            }
        }
        b'*' => {
            let count = parse_int(line)?;
            if count < 0 {
                (RespValue::Array(None), next)
            } else {
                let mut items = Vec::with_capacity(count.min(64) as usize);
                let mut cursor = next;
                for _ in 0..count {
                    match parse(buf, cursor, depth + 1)? {
                        Some((item, after)) => {
                            items.push(item);
                            cursor = after;
                        }
                        None => return Ok(None),
                    }
                }
                (RespValue::Array(Some(items)), cursor)
            }
        }
        other => return Err(invalid(format!("unexpected reply marker {:?}", other as char))),
    };

    Ok(Some(value))
}

impl Decoder for RespCodec {
    type Item = RespValue;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match parse(src, 0, 0)? {
            Some((value, consumed)) => {
                src.advance(consumed);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

impl Encoder<Command> for RespCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.put_slice(format!("*{}\r\n", item.args.len()).as_bytes());
        for arg in &item.args {
            dst.put_slice(format!("${}\r\n", arg.len()).as_bytes());
            dst.put_slice(arg);
            dst.put_slice(b"\r\n");
        }
        Ok(())
    }
}

/// Parse an INFO reply into `(key, value)` pairs.
///
/// Section headers (`# Server`) and blank lines are skipped; a line without
/// a colon is kept with an empty value.
pub fn parse_info(text: &str) -> Vec<(String, String)> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| match line.split_once(':') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (line.to_string(), String::new()),
        })
        .collect()
}
