//! RESP (Redis Serialization Protocol) Values
//!
//! The store speaks RESP2. Requests always go out as an array of bulk
//! strings; replies can be any of the five types.
//!
//! ## Protocol Format
//!
//! Each RESP type starts with a type prefix byte:
//! - `+` Simple String
//! - `-` Error
//! - `:` Integer
//! - `$` Bulk String
//! - `*` Array
//!
//! All types are terminated with CRLF (`\r\n`).
//!
//! ## Examples
//!
//! Request: `*3\r\n$5\r\nLPUSH\r\n$1\r\nq\r\n$2\r\nm1\r\n`
//! Integer reply: `:1\r\n`
//! Missing value: `$-1\r\n`

use bytes::Bytes;

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A value in the RESP protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// `+<string>\r\n`
    SimpleString(String),

    /// `-<error message>\r\n`
    Error(String),

    /// `:<integer>\r\n`
    Integer(i64),

    /// `$<length>\r\n<data>\r\n`
    BulkString(Bytes),

    /// Null bulk string (`$-1`) or null array (`*-1`)
    Null,

    /// `*<count>\r\n<element1><element2>...`
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Builds a request frame from a command name and its arguments.
    ///
    /// # Example
    /// ```
    /// use bucketq::protocol::RespValue;
    /// let cmd = RespValue::command(["RPOP", "q"]);
    /// assert_eq!(cmd.serialize(), b"*2\r\n$4\r\nRPOP\r\n$1\r\nq\r\n");
    /// ```
    pub fn command<I, A>(parts: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        RespValue::Array(
            parts
                .into_iter()
                .map(|part| RespValue::BulkString(Bytes::copy_from_slice(part.as_ref())))
                .collect(),
        )
    }

    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    /// Serializes the value to its wire format.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the value into an existing buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => write_line(buf, prefix::SIMPLE_STRING, s.as_bytes()),
            RespValue::Error(s) => write_line(buf, prefix::ERROR, s.as_bytes()),
            RespValue::Integer(n) => write_line(buf, prefix::INTEGER, n.to_string().as_bytes()),
            RespValue::BulkString(data) => {
                write_line(buf, prefix::BULK_STRING, data.len().to_string().as_bytes());
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            RespValue::Null => write_line(buf, prefix::BULK_STRING, b"-1"),
            RespValue::Array(values) => {
                write_line(buf, prefix::ARRAY, values.len().to_string().as_bytes());
                for value in values {
                    value.serialize_into(buf);
                }
            }
        }
    }

    /// Borrows the text of a simple or bulk string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) => Some(s),
            RespValue::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Consumes a simple or bulk string into an owned `String`.
    pub fn into_string(self) -> Option<String> {
        match self {
            RespValue::SimpleString(s) => Some(s),
            RespValue::BulkString(b) => String::from_utf8(b.to_vec()).ok(),
            _ => None,
        }
    }

    /// Consumes self and returns the inner array if this is an Array variant.
    pub fn into_array(self) -> Option<Vec<RespValue>> {
        match self {
            RespValue::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Short human-readable description, used in error messages.
    pub fn describe(&self) -> String {
        match self {
            RespValue::SimpleString(s) => format!("simple string {:?}", s),
            RespValue::Error(s) => format!("error {:?}", s),
            RespValue::Integer(n) => format!("integer {}", n),
            RespValue::BulkString(b) => format!("bulk string of {} bytes", b.len()),
            RespValue::Null => "null".to_string(),
            RespValue::Array(values) => format!("array of {} elements", values.len()),
        }
    }
}

fn write_line(buf: &mut Vec<u8>, type_prefix: u8, body: &[u8]) {
    buf.push(type_prefix);
    buf.extend_from_slice(body);
    buf.extend_from_slice(CRLF);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_serialize() {
        let cmd = RespValue::command(["ZADD", "k", "NX", "12", "m"]);
        assert_eq!(
            cmd.serialize(),
            b"*5\r\n$4\r\nZADD\r\n$1\r\nk\r\n$2\r\nNX\r\n$2\r\n12\r\n$1\r\nm\r\n"
        );
    }

    #[test]
    fn test_command_is_binary_safe() {
        let cmd = RespValue::command([&b"LPUSH"[..], b"k", b"a\r\nb"]);
        assert_eq!(
            cmd.serialize(),
            b"*3\r\n$5\r\nLPUSH\r\n$1\r\nk\r\n$4\r\na\r\nb\r\n"
        );
    }

    #[test]
    fn test_scalar_serialize() {
        assert_eq!(RespValue::ok().serialize(), b"+OK\r\n");
        assert_eq!(RespValue::error("ERR x").serialize(), b"-ERR x\r\n");
        assert_eq!(RespValue::integer(-42).serialize(), b":-42\r\n");
        assert_eq!(RespValue::Null.serialize(), b"$-1\r\n");
    }

    #[test]
    fn test_into_string() {
        assert_eq!(
            RespValue::bulk_string(Bytes::from("m1")).into_string(),
            Some("m1".to_string())
        );
        assert_eq!(RespValue::ok().into_string(), Some("OK".to_string()));
        assert_eq!(RespValue::integer(1).into_string(), None);
        assert_eq!(RespValue::Null.into_string(), None);
    }
}
