// src/core/protocol/frame.rs

//! Canonical wire framing for management requests/responses (spec §4.4, §6).
//! All multi-byte fields are big-endian; nothing is read or written through
//! struct-casting (spec Design Notes, "Endianness").

use crate::core::errors::BrokerError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Marks the end of an argument list; the last argument must be an `Int`
/// carrying this value.
pub const LAST_ARG_VALUE: i32 = -9999;

pub const HEADER_LEN: usize = 16;

/// The 16-byte fixed request header (spec §6).
#[derive(Debug, Clone, Copy)]
pub struct RequestHeader {
    pub opcode: u8,
    pub version: u32,
    pub payload_len: u32,
}

impl RequestHeader {
    pub fn decode(buf: &[u8]) -> Result<Self, BrokerError> {
        if buf.len() < HEADER_LEN {
            return Err(BrokerError::Communication("short header".into()));
        }
        let opcode = buf[0];
        // bytes 1..4 reserved
        let version = u32::from_be_bytes(buf[4..8].try_into().unwrap());
        let payload_len = u32::from_be_bytes(buf[8..12].try_into().unwrap());
        // remaining 4 bytes of the 16-byte header are reserved/padding in
        // this realization; the source's struct is wider than the fields it
        // documents.
        Ok(Self {
            opcode,
            version,
            payload_len,
        })
    }

    pub fn encode(&self, out: &mut BytesMut) {
        out.put_u8(self.opcode);
        out.put_bytes(0, 3);
        out.put_u32(self.version);
        out.put_u32(self.payload_len);
        out.put_bytes(0, 4);
    }
}

/// A typed argument value (spec §4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    Int(i32),
    Int64(i64),
    Str(String),
    StrArray(Vec<String>),
    IntArray(Vec<i32>),
}

const TAG_INT: u8 = 0;
const TAG_INT64: u8 = 1;
const TAG_STR: u8 = 2;
const TAG_STR_ARRAY: u8 = 3;
const TAG_INT_ARRAY: u8 = 4;

impl ArgValue {
    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            ArgValue::Int(v) => {
                out.put_u8(TAG_INT);
                out.put_i32(*v);
            }
            ArgValue::Int64(v) => {
                out.put_u8(TAG_INT64);
                out.put_i64(*v);
            }
            ArgValue::Str(s) => {
                out.put_u8(TAG_STR);
                let bytes = s.as_bytes();
                out.put_u32(bytes.len() as u32 + 1);
                out.put_slice(bytes);
                out.put_u8(0);
            }
            ArgValue::StrArray(items) => {
                out.put_u8(TAG_STR_ARRAY);
                out.put_u32(items.len() as u32);
                for s in items {
                    let bytes = s.as_bytes();
                    out.put_u32(bytes.len() as u32 + 1);
                    out.put_slice(bytes);
                    out.put_u8(0);
                }
            }
            ArgValue::IntArray(items) => {
                out.put_u8(TAG_INT_ARRAY);
                out.put_u32(items.len() as u32);
                for v in items {
                    out.put_i32(*v);
                }
            }
        }
    }

    fn decode(buf: &mut impl Buf) -> Result<Self, BrokerError> {
        if !buf.has_remaining() {
            return Err(BrokerError::InvalidArgument("truncated argument".into()));
        }
        let tag = buf.get_u8();
        match tag {
            TAG_INT => {
                require(buf, 4)?;
                Ok(ArgValue::Int(buf.get_i32()))
            }
            TAG_INT64 => {
                require(buf, 8)?;
                Ok(ArgValue::Int64(buf.get_i64()))
            }
            TAG_STR => Ok(ArgValue::Str(decode_cstr(buf)?)),
            TAG_STR_ARRAY => {
                require(buf, 4)?;
                let count = buf.get_u32();
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    items.push(decode_cstr(buf)?);
                }
                Ok(ArgValue::StrArray(items))
            }
            TAG_INT_ARRAY => {
                require(buf, 4)?;
                let count = buf.get_u32();
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    require(buf, 4)?;
                    items.push(buf.get_i32());
                }
                Ok(ArgValue::IntArray(items))
            }
            _ => Err(BrokerError::InvalidArgument(format!(
                "unknown argument tag {tag}"
            ))),
        }
    }
}

fn require(buf: &impl Buf, n: usize) -> Result<(), BrokerError> {
    if buf.remaining() < n {
        Err(BrokerError::InvalidArgument("truncated argument".into()))
    } else {
        Ok(())
    }
}

fn decode_cstr(buf: &mut impl Buf) -> Result<String, BrokerError> {
    require(buf, 4)?;
    let len = buf.get_u32() as usize;
    require(buf, len)?;
    let mut raw = vec![0u8; len];
    buf.copy_to_slice(&mut raw);
    // drop the trailing NUL written by `encode`.
    if raw.last() == Some(&0) {
        raw.pop();
    }
    String::from_utf8(raw).map_err(|e| BrokerError::InvalidArgument(e.to_string()))
}

/// Decodes a full argument list, enforcing the `LAST_ARG_VALUE` sentinel.
pub fn decode_args(payload: &[u8], num_args: u32) -> Result<Vec<ArgValue>, BrokerError> {
    let mut cursor = std::io::Cursor::new(payload);
    let mut args = Vec::with_capacity(num_args as usize);
    for _ in 0..num_args {
        args.push(ArgValue::decode(&mut cursor)?);
    }
    match args.last() {
        Some(ArgValue::Int(v)) if *v == LAST_ARG_VALUE => Ok(args),
        _ => Err(BrokerError::InvalidArgument(
            "missing terminating sentinel argument".into(),
        )),
    }
}

/// Encodes an argument list, appending the terminating sentinel.
pub fn encode_args(args: &[ArgValue]) -> Bytes {
    let mut out = BytesMut::new();
    out.put_u32(args.len() as u32 + 1);
    for arg in args {
        arg.encode(&mut out);
    }
    ArgValue::Int(LAST_ARG_VALUE).encode(&mut out);
    out.freeze()
}

/// A framed management response: an error code followed by zero or more
/// opaque byte blocks (spec §6).
#[derive(Debug, Clone)]
pub struct ManagementResponse {
    pub error_code: i32,
    pub bodies: Vec<Bytes>,
}

impl ManagementResponse {
    pub fn ok(bodies: Vec<Bytes>) -> Self {
        Self {
            error_code: 0,
            bodies,
        }
    }

    pub fn err(e: &BrokerError) -> Self {
        Self {
            error_code: e.wire_code(),
            bodies: vec![],
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::new();
        out.put_i32(self.error_code);
        out.put_u32(self.bodies.len() as u32);
        for body in &self.bodies {
            out.put_u32(body.len() as u32);
        }
        for body in &self.bodies {
            out.put_slice(body);
        }
        out.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arg_strategy() -> impl Strategy<Value = ArgValue> {
        prop_oneof![
            any::<i32>().prop_map(ArgValue::Int),
            any::<i64>().prop_map(ArgValue::Int64),
            ".*".prop_map(ArgValue::Str),
            proptest::collection::vec(".*", 0..4).prop_map(ArgValue::StrArray),
            proptest::collection::vec(any::<i32>(), 0..4).prop_map(ArgValue::IntArray),
        ]
    }

    proptest! {
        #[test]
        fn round_trip(args in proptest::collection::vec(arg_strategy(), 0..64)) {
            let mut filtered: Vec<ArgValue> = args
                .into_iter()
                .filter(|a| !matches!(a, ArgValue::Int(v) if *v == LAST_ARG_VALUE))
                .collect();
            filtered.truncate(63);
            let encoded = encode_args(&filtered);
            let mut cursor = std::io::Cursor::new(encoded.as_ref());
            let num_args = cursor.get_u32();
            let payload = &encoded[4..];
            let decoded = decode_args(payload, num_args).unwrap();
            prop_assert_eq!(decoded.len(), filtered.len() + 1);
            prop_assert_eq!(&decoded[..filtered.len()], filtered.as_slice());
            prop_assert_eq!(decoded.last().unwrap(), &ArgValue::Int(LAST_ARG_VALUE));
        }
    }

    #[test]
    fn missing_sentinel_is_rejected() {
        let args = vec![ArgValue::Int(5)];
        let mut out = BytesMut::new();
        out.put_u32(1);
        args[0].encode(&mut out);
        assert!(decode_args(&out, 1).is_err());
    }
}
