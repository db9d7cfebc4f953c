use super::{RespError, RespParser, RespValue};
use bytes::{Buf, BytesMut};
use std::io::{Error as IoError, ErrorKind};
use tokio_util::codec::{Decoder, Encoder};

/// Upper bound on buffered, not-yet-parsed bytes
const MAX_FRAME_BYTES: usize = 512 * 1024 * 1024;

/// Framing for `tokio_util::codec::Framed` over a RESP2 byte stream
#[derive(Debug, Clone, Copy, Default)]
pub struct RespCodec;

impl Decoder for RespCodec {
    type Item = RespValue;
    type Error = IoError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RespValue>, IoError> {
        match RespParser::parse(&src[..]) {
            Ok((value, consumed)) => {
                src.advance(consumed);
                Ok(Some(value))
            }
            Err(RespError::Incomplete) if src.len() > MAX_FRAME_BYTES => Err(IoError::new(
                ErrorKind::InvalidData,
                "RESP frame exceeds maximum size",
            )),
            Err(RespError::Incomplete) => Ok(None),
            Err(RespError::Invalid(msg)) => Err(IoError::new(ErrorKind::InvalidData, msg)),
        }
    }
}

impl Encoder<RespValue> for RespCodec {
    type Error = IoError;

    fn encode(&mut self, item: RespValue, dst: &mut BytesMut) -> Result<(), IoError> {
        RespParser::encode_into(&item, dst);
        Ok(())
    }
}
