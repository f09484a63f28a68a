//! RESP Protocol Implementation
//!
//! Client side of the Redis Serialization Protocol: requests are encoded as
//! arrays of bulk strings, replies are parsed incrementally as they arrive.
//!
//! ## Modules
//!
//! - `types`: the `RespValue` enum and its serialization
//! - `parser`: incremental reply parser
//!
//! ## Example
//!
//! ```
//! use bucketq::protocol::{parse_message, RespValue};
//!
//! let request = RespValue::command(["LLEN", "Q_List_Hours:2026-10-17_14"]).serialize();
//! assert!(request.starts_with(b"*2\r\n$4\r\nLLEN"));
//!
//! let (reply, consumed) = parse_message(b":3\r\n").unwrap().unwrap();
//! assert_eq!(reply.as_integer(), Some(3));
//! assert_eq!(consumed, 4);
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_message, ParseError, ParseResult, RespParser};
pub use types::RespValue;
