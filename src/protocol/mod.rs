//! RESP Protocol Implementation
//!
//! This module provides an implementation of the Redis Serialization
//! Protocol, version 2.
//!
//! ## Overview
//!
//! RESP is a simple, binary-safe protocol used by Redis for client-server
//! communication. Requests and responses share the same framing, so one
//! value type and one parser cover both directions.
//!
//! ## Modules
//!
//! - `types`: Defines the `RespValue` enum and serialization
//! - `parser`: Incremental parser for arbitrarily split incoming data
//!
//! ## Example
//!
//! ```ignore
//! use sparkkv::protocol::{parse_message, RespValue};
//! use bytes::Bytes;
//!
//! // Parsing incoming data
//! let data = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let (value, consumed) = parse_message(data).unwrap().unwrap();
//!
//! // Creating responses
//! let response = RespValue::bulk_string(Bytes::from("value"));
//! let bytes = response.serialize();
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{parse_message, ParseError, ParseResult, RespParser};
pub use types::RespValue;
