//! Incremental RESP Reply Parser
//!
//! Replies arrive over TCP in arbitrary chunks, so the parser never assumes
//! a whole frame is present. Parsing returns:
//! - `Ok(Some((value, consumed)))` - a complete frame, `consumed` bytes used
//! - `Ok(None)` - the frame is incomplete, read more and try again
//! - `Err(ParseError)` - the peer sent something that is not RESP
//!
//! The caller appends socket data to a buffer, parses, and advances the
//! buffer by `consumed` once a frame is complete.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur during RESP parsing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Unknown type prefix byte
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    /// Invalid integer format
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Invalid UTF-8 in a header line
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Bulk string length is negative (but not -1 for null)
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Array length is negative (but not -1 for null)
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Protocol violation (missing CRLF, etc.)
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The frame exceeds maximum allowed size
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum array nesting depth (prevent stack overflow)
pub const MAX_NESTING_DEPTH: usize = 32;

type Parsed = Option<(RespValue, usize)>;

/// Parser for RESP replies.
#[derive(Debug, Default)]
pub struct RespParser {
    depth: usize,
}

impl RespParser {
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Attempts to parse one reply frame from the start of `buf`.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Parsed> {
        self.depth = 0;
        self.parse_value(buf)
    }

    fn parse_value(&mut self, buf: &[u8]) -> ParseResult<Parsed> {
        let Some(&type_prefix) = buf.first() else {
            return Ok(None);
        };

        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::ProtocolError(format!(
                "maximum nesting depth exceeded: {}",
                MAX_NESTING_DEPTH
            )));
        }

        // Every frame starts with a header line
        let Some((line, header_len)) = read_line(&buf[1..]) else {
            return Ok(None);
        };
        let header_len = header_len + 1;

        match type_prefix {
            prefix::SIMPLE_STRING => {
                let s = utf8(line)?;
                Ok(Some((RespValue::SimpleString(s.to_string()), header_len)))
            }
            prefix::ERROR => {
                let s = utf8(line)?;
                Ok(Some((RespValue::Error(s.to_string()), header_len)))
            }
            prefix::INTEGER => Ok(Some((RespValue::Integer(integer(line)?), header_len))),
            prefix::BULK_STRING => parse_bulk_body(buf, integer(line)?, header_len),
            prefix::ARRAY => self.parse_array_body(buf, integer(line)?, header_len),
            other => Err(ParseError::UnknownPrefix(other)),
        }
    }

    fn parse_array_body(&mut self, buf: &[u8], count: i64, header_len: usize) -> ParseResult<Parsed> {
        if count == -1 {
            return Ok(Some((RespValue::Null, header_len)));
        }
        if count < 0 {
            return Err(ParseError::InvalidArrayLength(count));
        }

        let count = count as usize;
        // The element count comes from the peer; cap the preallocation
        let mut elements = Vec::with_capacity(count.min(1024));
        let mut consumed = header_len;

        self.depth += 1;
        for _ in 0..count {
            match self.parse_value(&buf[consumed..])? {
                Some((value, used)) => {
                    elements.push(value);
                    consumed += used;
                }
                None => return Ok(None),
            }
        }
        self.depth -= 1;

        Ok(Some((RespValue::Array(elements), consumed)))
    }
}

fn parse_bulk_body(buf: &[u8], length: i64, header_len: usize) -> ParseResult<Parsed> {
    if length == -1 {
        return Ok(Some((RespValue::Null, header_len)));
    }
    if length < 0 {
        return Err(ParseError::InvalidBulkLength(length));
    }

    let length = length as usize;
    if length > MAX_BULK_SIZE {
        return Err(ParseError::MessageTooLarge {
            size: length,
            max: MAX_BULK_SIZE,
        });
    }

    let total = header_len + length + 2;
    if buf.len() < total {
        return Ok(None);
    }
    if &buf[header_len + length..total] != CRLF {
        return Err(ParseError::ProtocolError(
            "bulk string missing trailing CRLF".to_string(),
        ));
    }

    let data = Bytes::copy_from_slice(&buf[header_len..header_len + length]);
    Ok(Some((RespValue::BulkString(data), total)))
}

/// Splits off the first CRLF-terminated line.
///
/// Returns the line without its terminator and the bytes consumed including it.
#[inline]
fn read_line(buf: &[u8]) -> Option<(&[u8], usize)> {
    buf.windows(2)
        .position(|w| w == CRLF)
        .map(|pos| (&buf[..pos], pos + 2))
}

fn utf8(line: &[u8]) -> ParseResult<&str> {
    std::str::from_utf8(line).map_err(|e| ParseError::InvalidUtf8(e.to_string()))
}

fn integer(line: &[u8]) -> ParseResult<i64> {
    utf8(line)?
        .parse()
        .map_err(|e: std::num::ParseIntError| ParseError::InvalidInteger(e.to_string()))
}

/// Parses a single frame with a fresh parser.
pub fn parse_message(buf: &[u8]) -> ParseResult<Parsed> {
    RespParser::new().parse(buf)
}
