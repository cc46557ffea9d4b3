//! Framing shared by the ingestion protocol and the supervisor feedback channel.

pub mod message;

pub use message::{decode_array, encode_array, read_array, write_array, ProtocolError};
