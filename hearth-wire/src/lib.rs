//! Frame channel and descriptor-passing substrate for hearth.
//!
//! Every message on a channel is a frame: a 4-byte big-endian length followed
//! by exactly that many payload bytes. Length-prefixed framing keeps the byte
//! stream positionally deterministic, which matters because file descriptors
//! ride the same socket as ancillary data and must not be misaligned by
//! partial reads.
//!
//! Public API surface:
//! - [`channel`] — [`FrameChannel`], blocking framed send/receive
//! - [`fdpass`] — SCM_RIGHTS descriptor transfer on the channel's socket
//! - [`error`] — [`WireError`]

pub mod channel;
pub mod error;
pub mod fdpass;

pub use channel::FrameChannel;
pub use error::WireError;
