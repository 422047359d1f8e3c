//! Fast RPC framing, as spoken by moray.
//!
//! ```text
//!  0         1         2         3                   7                  11                  15
//! +---------+---------+---------+-------------------+-------------------+-------------------+----
//! | version |  type   | status  |   msgid (u32 BE)  |   crc16 (u32 BE)  |  data len (u32 BE)| data
//! +---------+---------+---------+-------------------+-------------------+-------------------+----
//! ```
//!
//! `data` is a JSON object `{"m": {"name", "uts"}, "d": ...}`. Version 2
//! frames carry a CRC-16/ARC of the data; version 1 checksums were computed
//! by a broken implementation and are not verified.

use bytes::{Buf, BufMut, BytesMut};
use crc::{CRC_16_ARC, Crc};
use serde_json::{Value, json};
use std::io;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::codec::{Decoder, Encoder};

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_ARC);

pub const HEADER_LEN: usize = 15;
pub const VERSION_1: u8 = 0x01;
pub const VERSION_2: u8 = 0x02;
const TYPE_JSON: u8 = 0x01;
const MAX_DATA_LEN: usize = 64 * 1024 * 1024;

/// Frame status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastStatus {
    /// One result, more may follow
    Data = 0x01,
    /// Final frame of a successful call
    End = 0x02,
    /// The call failed; data holds the error object
    Error = 0x03,
}

impl FastStatus {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(FastStatus::Data),
            0x02 => Some(FastStatus::End),
            0x03 => Some(FastStatus::Error),
            _ => None,
        }
    }
}

/// One Fast frame
#[derive(Debug, Clone, PartialEq)]
pub struct FastMessage {
    pub msgid: u32,
    pub status: FastStatus,
    /// Decoded `data` object
    pub data: Value,
}

impl FastMessage {
    /// An RPC request: a DATA frame naming `method` with `args`
    pub fn request(msgid: u32, method: &str, args: Vec<Value>) -> Self {
        Self {
            msgid,
            status: FastStatus::Data,
            data: json!({
                "m": { "name": method, "uts": now_micros() },
                "d": args,
            }),
        }
    }

    /// A response frame for `method`, as a server sends it
    pub fn response(msgid: u32, status: FastStatus, method: &str, d: Value) -> Self {
        Self {
            msgid,
            status,
            data: json!({
                "m": { "name": method, "uts": now_micros() },
                "d": d,
            }),
        }
    }

    /// RPC method named by the frame
    pub fn method(&self) -> Option<&str> {
        self.data.pointer("/m/name").and_then(Value::as_str)
    }

    /// The `d` payload
    pub fn payload(&self) -> &Value {
        self.data.get("d").unwrap_or(&Value::Null)
    }

    /// `name: message` of an ERROR frame
    pub fn error_summary(&self) -> String {
        let d = self.payload();
        let name = d.get("name").and_then(Value::as_str).unwrap_or("Error");
        let message = d.get("message").and_then(Value::as_str).unwrap_or("");
        if message.is_empty() {
            name.to_string()
        } else {
            format!("{}: {}", name, message)
        }
    }
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Codec for Fast frames
#[derive(Debug, Clone, Copy, Default)]
pub struct FastCodec;

impl Decoder for FastCodec {
    type Item = FastMessage;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let version = src[0];
        if version != VERSION_1 && version != VERSION_2 {
            return Err(invalid(format!("unsupported fast version {}", version)));
        }
        if src[1] != TYPE_JSON {
            return Err(invalid(format!("unsupported fast type {}", src[1])));
        }
        let status = FastStatus::from_u8(src[2])
            .ok_or_else(|| invalid(format!("unsupported fast status {}", src[2])))?;

        let msgid = u32::from_be_bytes([src[3], src[4], src[5], src[6]]);
        let crc = u32::from_be_bytes([src[7], src[8], src[9], src[10]]);
        let len = u32::from_be_bytes([src[11], src[12], src[13], src[14]]) as usize;

        if len > MAX_DATA_LEN {
            return Err(invalid(format!("fast frame of {} bytes exceeds limit", len)));
        }
        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let body = src.split_to(len);

        if version == VERSION_2 && u32::from(CRC16.checksum(&body)) != crc {
            return Err(invalid(format!("fast crc mismatch on message {}", msgid)));
        }

        let data: Value = serde_json::from_slice(&body)
            .map_err(|e| invalid(format!("fast payload is not JSON: {}", e)))?;

        Ok(Some(FastMessage {
            msgid,
            status,
            data,
        }))
    }
}

impl Encoder<FastMessage> for FastCodec {
    type Error = io::Error;

    fn encode(&mut self, item: FastMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = serde_json::to_vec(&item.data)?;
        if body.len() > MAX_DATA_LEN {
            return Err(invalid("fast payload too large"));
        }

        dst.reserve(HEADER_LEN + body.len());
        dst.put_u8(VERSION_2);
        dst.put_u8(TYPE_JSON);
        dst.put_u8(item.status as u8);
        dst.put_u32(item.msgid);
        dst.put_u32(u32::from(CRC16.checksum(&body)));
        dst.put_u32(body.len() as u32);
        dst.put_slice(&body);
        Ok(())
    }
}
