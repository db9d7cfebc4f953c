//! RESP2 values, parser and encoder
//!
//! The parser is incremental: it reports [`RespError::Incomplete`] when the
//! buffer holds only part of a frame, so callers can wait for more bytes.

mod codec;

pub use codec::RespCodec;

use bytes::{BufMut, BytesMut};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Option<Vec<u8>>),
    Array(Option<Vec<RespValue>>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RespError {
    /// More bytes are needed to finish the current frame
    #[error("incomplete frame")]
    Incomplete,
    #[error("invalid frame: {0}")]
    Invalid(String),
}

impl RespValue {
    /// A command as clients send it: an array of bulk strings
    pub fn command<A: AsRef<[u8]>>(args: &[A]) -> Self {
        RespValue::Array(Some(
            args.iter()
                .map(|arg| RespValue::BulkString(Some(arg.as_ref().to_vec())))
                .collect(),
        ))
    }

    #[inline]
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    #[inline]
    pub fn pong() -> Self {
        RespValue::SimpleString("PONG".to_string())
    }

    #[inline]
    pub fn nil() -> Self {
        RespValue::BulkString(None)
    }

    #[inline]
    pub fn bulk(data: impl Into<Vec<u8>>) -> Self {
        RespValue::BulkString(Some(data.into()))
    }

    #[inline]
    pub fn error(message: impl Into<String>) -> Self {
        RespValue::Error(message.into())
    }

    /// Command name (upper-cased) and arguments, when this is a command array
    pub fn as_command(&self) -> Option<(String, Vec<&[u8]>)> {
        let RespValue::Array(Some(items)) = self else {
            return None;
        };
        let mut parts = items.iter().map(|item| match item {
            RespValue::BulkString(Some(data)) => Some(data.as_slice()),
            RespValue::SimpleString(s) => Some(s.as_bytes()),
            _ => None,
        });
        let name = parts.next()??;
        let args = parts.collect::<Option<Vec<_>>>()?;
        Some((String::from_utf8_lossy(name).to_ascii_uppercase(), args))
    }

    /// Short type name for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            RespValue::SimpleString(_) => "simple string",
            RespValue::Error(_) => "error",
            RespValue::Integer(_) => "integer",
            RespValue::BulkString(None) => "nil",
            RespValue::BulkString(Some(_)) => "bulk string",
            RespValue::Array(_) => "array",
        }
    }
}

pub struct RespParser;

impl RespParser {
    /// Parse one frame from the front of `input`, returning it with the
    /// number of bytes consumed.
    pub fn parse(input: &[u8]) -> Result<(RespValue, usize), RespError> {
        if input.is_empty() {
            return Err(RespError::Incomplete);
        }

        match input[0] {
            b'+' => Self::parse_simple_string(input),
            b'-' => Self::parse_error(input),
            b':' => Self::parse_integer(input),
            b'$' => Self::parse_bulk_string(input),
            b'*' => Self::parse_array(input),
            other => Err(RespError::Invalid(format!(
                "unknown RESP type byte {:?}",
                other as char
            ))),
        }
    }

    fn parse_simple_string(input: &[u8]) -> Result<(RespValue, usize), RespError> {
        let pos = Self::find_crlf(input).ok_or(RespError::Incomplete)?;
        let s = String::from_utf8_lossy(&input[1..pos]).to_string();
        Ok((RespValue::SimpleString(s), pos + 2))
    }

    fn parse_error(input: &[u8]) -> Result<(RespValue, usize), RespError> {
        let pos = Self::find_crlf(input).ok_or(RespError::Incomplete)?;
        let s = String::from_utf8_lossy(&input[1..pos]).to_string();
        Ok((RespValue::Error(s), pos + 2))
    }

    fn parse_integer(input: &[u8]) -> Result<(RespValue, usize), RespError> {
        let pos = Self::find_crlf(input).ok_or(RespError::Incomplete)?;
        let n = Self::parse_number(&input[1..pos])?;
        Ok((RespValue::Integer(n), pos + 2))
    }

    fn parse_bulk_string(input: &[u8]) -> Result<(RespValue, usize), RespError> {
        let pos = Self::find_crlf(input).ok_or(RespError::Incomplete)?;
        let len = Self::parse_number(&input[1..pos])?;

        if len == -1 {
            return Ok((RespValue::BulkString(None), pos + 2));
        }
        if len < 0 {
            return Err(RespError::Invalid(format!("negative bulk length {}", len)));
        }

        let start = pos + 2;
        let end = start + len as usize;

        if end + 2 > input.len() {
            return Err(RespError::Incomplete);
        }
        if &input[end..end + 2] != b"\r\n" {
            return Err(RespError::Invalid("bulk string not terminated by CRLF".into()));
        }

        let data = input[start..end].to_vec();
        Ok((RespValue::BulkString(Some(data)), end + 2))
    }

    fn parse_array(input: &[u8]) -> Result<(RespValue, usize), RespError> {
        let pos = Self::find_crlf(input).ok_or(RespError::Incomplete)?;
        let len = Self::parse_number(&input[1..pos])?;

        if len == -1 {
            return Ok((RespValue::Array(None), pos + 2));
        }
        if len < 0 {
            return Err(RespError::Invalid(format!("negative array length {}", len)));
        }

        let mut elements = Vec::with_capacity((len as usize).min(64));
        let mut offset = pos + 2;

        for _ in 0..len {
            let (value, consumed) = Self::parse(&input[offset..])?;
            elements.push(value);
            offset += consumed;
        }

        Ok((RespValue::Array(Some(elements)), offset))
    }

    fn parse_number(digits: &[u8]) -> Result<i64, RespError> {
        std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| {
                RespError::Invalid(format!(
                    "invalid integer {:?}",
                    String::from_utf8_lossy(digits)
                ))
            })
    }

    #[inline]
    fn find_crlf(input: &[u8]) -> Option<usize> {
        let mut from = 0;
        while let Some(rel) = memchr::memchr(b'\r', &input[from..]) {
            let pos = from + rel;
            if pos + 1 >= input.len() {
                return None;
            }
            if input[pos + 1] == b'\n' {
                return Some(pos);
            }
            from = pos + 1;
        }
        None
    }

    pub fn encode(value: &RespValue) -> Vec<u8> {
        let mut buf = BytesMut::new();
        Self::encode_into(value, &mut buf);
        buf.to_vec()
    }

    pub fn encode_into(value: &RespValue, buf: &mut BytesMut) {
        match value {
            RespValue::SimpleString(s) => {
                buf.put_u8(b'+');
                buf.put_slice(s.as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::Error(s) => {
                buf.put_u8(b'-');
                buf.put_slice(s.as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::Integer(n) => {
                buf.put_slice(format!(":{}\r\n", n).as_bytes());
            }
            RespValue::BulkString(None) => buf.put_slice(b"$-1\r\n"),
            RespValue::BulkString(Some(data)) => {
                buf.put_slice(format!("${}\r\n", data.len()).as_bytes());
                buf.put_slice(data);
                buf.put_slice(b"\r\n");
            }
            RespValue::Array(None) => buf.put_slice(b"*-1\r\n"),
            RespValue::Array(Some(elements)) => {
                buf.put_slice(format!("*{}\r\n", elements.len()).as_bytes());
                for element in elements {
                    Self::encode_into(element, buf);
                }
            }
        }
    }
}
