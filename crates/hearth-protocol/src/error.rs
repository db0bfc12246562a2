//! Error types for the protocol layer.

/// Errors produced while decoding a byte stream.
///
/// Every variant is fatal for the connection that produced it: the
/// transport drops the socket without sending a reply.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A length header announced more bytes than the codec accepts.
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge {
        /// Length announced by the header.
        len: u64,
        /// Limit configured on the codec.
        max: usize,
    },
}
