//! # mssql-codec
//!
//! Packet framing for the TDS protocol.
//!
//! [`Channel`] owns a transport plus a bounded [`FramedReader`] and
//! [`FramedWriter`]: callers read and write logical message bytes and the
//! channel splits them into packets of the negotiated size. The transport is
//! only borrowed per call by the framing halves, so it can be replaced (for
//! example wrapped in TLS) without losing framing state.
//!
//! ```text
//! bytes ─▶ FramedWriter ─▶ [header|payload][header|payload]… ─▶ transport
//! transport ─▶ FramedReader ─▶ payload bytes (headers stripped)
//! ```
//!
//! [`PacketCodec`] and [`MessageAssembler`] serve the receiving end of a
//! client stream, where whole packets are collected into messages.
//!
//! [`BlockingIo`] lets the same async code run over a blocking stream.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod blocking;
pub mod channel;
pub mod error;
pub mod framed;
pub mod message;
pub mod packet_codec;

pub use blocking::BlockingIo;
pub use channel::Channel;
pub use error::CodecError;
pub use framed::{FramedReader, FramedWriter, MAX_NEGOTIATED_PACKET_SIZE, MIN_PACKET_SIZE};
pub use message::{Message, MessageAssembler};
pub use packet_codec::{Packet, PacketCodec};
