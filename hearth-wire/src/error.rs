//! Error types for hearth-wire.

use thiserror::Error;

/// All errors that can arise from framed transport and descriptor passing.
#[derive(Debug, Error)]
pub enum WireError {
    /// Payload does not fit the frame's 4-byte length prefix (or exceeds the
    /// channel's configured maximum). Nothing is written to the stream.
    #[error("payload of {len} bytes exceeds the maximum frame length of {max} bytes")]
    Encoding { len: usize, max: u32 },

    /// The stream ended inside a length prefix — the peer closed mid-frame.
    #[error("stream ended after {got} of 4 length-prefix bytes")]
    TruncatedPrefix { got: usize },

    /// The stream ended before a full payload arrived.
    #[error("stream ended before {expected} payload bytes arrived")]
    TruncatedPayload { expected: usize },

    /// The peer announced a frame larger than this channel accepts.
    #[error("incoming frame of {len} bytes exceeds the maximum frame length of {max} bytes")]
    FrameTooLarge { len: u32, max: u32 },

    /// An ancillary receive completed without delivering a descriptor,
    /// or the peer closed while one was expected.
    #[error("expected a file descriptor in ancillary data, none arrived")]
    MissingDescriptor,

    /// Underlying read/write failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// sendmsg/recvmsg failure during a descriptor transfer.
    #[error("descriptor transfer failed: {0}")]
    Transfer(#[from] nix::Error),
}
