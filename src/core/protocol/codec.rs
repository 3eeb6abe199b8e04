// src/core/protocol/codec.rs

//! `tokio_util::codec::{Decoder, Encoder}` pair for the management wire
//! format, usable with `Framed` (spec §4.4), mirroring the structure of the
//! teacher's RESP framer: a header decode step, an argument-array decode
//! step, then a typed-request decode step.

use super::frame::{self, HEADER_LEN, ManagementResponse, RequestHeader};
use super::{ManagementRequest, parse_request};
use crate::core::errors::BrokerError;
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// One fully decoded management request, still carrying the header fields a
/// handler may need (client version, for protocol negotiation).
#[derive(Debug, Clone)]
pub struct DecodedRequest {
    pub version: u32,
    pub request: ManagementRequest,
}

#[derive(Default)]
pub struct ManagementCodec {
    header: Option<RequestHeader>,
}

impl Decoder for ManagementCodec {
    type Item = DecodedRequest;
    type Error = BrokerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.header.is_none() {
            if src.len() < HEADER_LEN {
                return Ok(None);
            }
            let header = RequestHeader::decode(&src[..HEADER_LEN])?;
            src.advance(HEADER_LEN);
            self.header = Some(header);
        }

        let header = self.header.unwrap();
        if (src.len() as u32) < header.payload_len {
            return Ok(None);
        }

        let payload = src.split_to(header.payload_len as usize);
        self.header = None;

        if payload.len() < 4 {
            return Err(BrokerError::InvalidArgument("missing arg count".into()));
        }
        let mut cursor = std::io::Cursor::new(payload.as_ref());
        let num_args = cursor.get_u32();
        let args_payload = &payload[4..];
        let args = frame::decode_args(args_payload, num_args)?;
        let request = parse_request(header.opcode, &args)?;

        Ok(Some(DecodedRequest {
            version: header.version,
            request,
        }))
    }
}

impl Encoder<ManagementResponse> for ManagementCodec {
    type Error = BrokerError;

    fn encode(&mut self, item: ManagementResponse, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let encoded: Bytes = item.encode();
        dst.extend_from_slice(&encoded);
        Ok(())
    }
}

/// Partially decoded response header: error code plus the body lengths,
/// read before we know whether the full body has arrived yet.
struct ResponseHeader {
    error_code: i32,
    body_lens: Vec<u32>,
}

/// The client-side counterpart to `ManagementCodec`: encodes requests,
/// decodes responses. Used by the admin CLI and the local-mgmt sync loop,
/// which both act as clients of this protocol (spec §6) rather than
/// servers of it.
#[derive(Default)]
pub struct ManagementClientCodec {
    header: Option<ResponseHeader>,
}

impl Encoder<ManagementRequest> for ManagementClientCodec {
    type Error = BrokerError;

    fn encode(&mut self, item: ManagementRequest, dst: &mut BytesMut) -> Result<(), Self::Error> {
        // Protocol version 1: the only version this realization speaks.
        dst.extend_from_slice(&item.encode(1));
        Ok(())
    }
}

impl Decoder for ManagementClientCodec {
    type Item = ManagementResponse;
    type Error = BrokerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.header.is_none() {
            if src.len() < 8 {
                return Ok(None);
            }
            let mut cursor = std::io::Cursor::new(&src[..8]);
            let error_code = cursor.get_i32();
            let num_bodies = cursor.get_u32();
            if src.len() < 8 + num_bodies as usize * 4 {
                return Ok(None);
            }
            src.advance(8);
            let mut body_lens = Vec::with_capacity(num_bodies as usize);
            for _ in 0..num_bodies {
                body_lens.push(src.get_u32());
            }
            self.header = Some(ResponseHeader { error_code, body_lens });
        }

        let header = self.header.as_ref().unwrap();
        let total: usize = header.body_lens.iter().map(|l| *l as usize).sum();
        if src.len() < total {
            return Ok(None);
        }

        let header = self.header.take().unwrap();
        let mut bodies = Vec::with_capacity(header.body_lens.len());
        for len in header.body_lens {
            bodies.push(src.split_to(len as usize).freeze());
        }
        Ok(Some(ManagementResponse {
            error_code: header.error_code,
            bodies,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::frame::ArgValue;
    use crate::core::protocol::opcode::PING;
    use bytes::BufMut;

    #[test]
    fn decodes_a_ping_request() {
        let args = [];
        let payload = frame::encode_args(&args);
        let header = RequestHeader {
            opcode: PING,
            version: 1,
            payload_len: payload.len() as u32,
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        buf.put_slice(&payload);

        let mut codec = ManagementCodec::default();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(decoded.request, ManagementRequest::Ping));
        assert_eq!(decoded.version, 1);
    }

    #[test]
    fn rejects_unknown_opcode() {
        let args = [ArgValue::Int(frame::LAST_ARG_VALUE)];
        let payload = frame::encode_args(&args[..0]);
        let header = RequestHeader {
            opcode: 250,
            version: 1,
            payload_len: payload.len() as u32,
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        buf.put_slice(&payload);

        let mut codec = ManagementCodec::default();
        assert!(codec.decode(&mut buf).is_err());
    }
}
