//! Wire format between the bridge and its worker subprocess.
//!
//! # Architecture
//!
//! - **protocol**: Message types (Message, Body, Payload, Operation)
//! - **codec**: NDJSON framing codec for AsyncRead/AsyncWrite

pub mod codec;
pub mod protocol;
