//! Wire-level building blocks for Hearth.
//!
//! This crate knows how bytes on a socket turn into discrete messages and
//! back. It has no notion of sockets, players, or rooms:
//!
//! - **Types** ([`PlayerId`], [`RoomId`], [`Uid`]): identifiers shared by
//!   every other layer.
//! - **Codecs** ([`RawFramedCodec`], [`WebSocketCodec`], wrapped by
//!   [`ProtocolCodec`]): stateful decoders that tolerate partial reads
//!   and several messages per read, plus stateless encoders.
//! - **Errors** ([`ProtocolError`]): framing violations that end a
//!   connection.
//!
//! ```text
//! socket bytes → ProtocolCodec::decode → Vec<Frame> → session / rooms
//! room payload → Protocol::encode      → socket bytes
//! ```

mod codec;
mod error;
mod types;

pub use codec::{
    DEFAULT_MAX_MESSAGE_LEN, Frame, Protocol, ProtocolCodec, RAW_MARKER, RawFramedCodec,
    WebSocketCodec,
};
pub use error::ProtocolError;
pub use types::{PlayerId, RoomId, Uid};
