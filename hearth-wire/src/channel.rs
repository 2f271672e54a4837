//! Blocking length-prefixed frame transport.
//!
//! A [`FrameChannel`] owns one byte stream (a connected socket, or a pipe
//! end) and exchanges frames on it: `u32` big-endian length, then payload.
//! Reads and writes go straight to the stream — no internal buffering, so
//! descriptor transfers performed on the same socket between frames (see
//! [`crate::fdpass`]) always observe the stream at a frame boundary.

use std::io::{Read, Write};
use std::os::fd::{AsRawFd, RawFd};

use crate::error::WireError;

/// Number of bytes in a frame's length prefix.
pub const PREFIX_LEN: usize = 4;

/// Default maximum frame length: everything a `u32` prefix can describe.
pub const MAX_FRAME_LEN: u32 = u32::MAX;

/// Blocking framed transport over any byte-oriented stream.
///
/// Single producer / single consumer per direction. Every completed send
/// writes exactly `4 + N` bytes and flushes; every completed receive reads
/// exactly `4 + N` bytes, or reports end-of-stream only at a frame boundary.
pub struct FrameChannel<S> {
    stream: S,
    max_frame_len: u32,
}

impl<S> FrameChannel<S> {
    /// Wrap a stream in a channel with the default frame-length limit.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            max_frame_len: MAX_FRAME_LEN,
        }
    }

    /// Lower the maximum frame length accepted in either direction.
    pub fn with_max_frame_len(stream: S, max_frame_len: u32) -> Self {
        Self {
            stream,
            max_frame_len,
        }
    }

    /// Borrow the underlying stream.
    ///
    /// Deliberate capability leak: callers perform ancillary descriptor
    /// sends/receives on the same socket between frames.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Unwrap the channel back into its stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: AsRawFd> AsRawFd for FrameChannel<S> {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

impl<S: Write> FrameChannel<S> {
    /// Send one frame: length prefix, payload, flush.
    ///
    /// Oversize payloads fail with [`WireError::Encoding`] before any byte
    /// reaches the stream.
    pub fn send(&mut self, payload: &[u8]) -> Result<(), WireError> {
        let len = u32::try_from(payload.len())
            .ok()
            .filter(|len| *len <= self.max_frame_len)
            .ok_or(WireError::Encoding {
                len: payload.len(),
                max: self.max_frame_len,
            })?;

        self.stream.write_all(&len.to_be_bytes())?;
        self.stream.write_all(payload)?;
        self.stream.flush()?;
        Ok(())
    }
}

impl<S: Read> FrameChannel<S> {
    /// Receive the next frame.
    ///
    /// Returns `Ok(None)` if and only if the stream ends cleanly where a
    /// length prefix would begin. A stream that ends after 1–3 prefix bytes
    /// fails with [`WireError::TruncatedPrefix`]; one that ends inside the
    /// payload fails with [`WireError::TruncatedPayload`].
    pub fn recv(&mut self) -> Result<Option<Vec<u8>>, WireError> {
        let mut prefix = [0u8; PREFIX_LEN];
        let mut filled = 0;
        while filled < PREFIX_LEN {
            match self.stream.read(&mut prefix[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => return Err(WireError::TruncatedPrefix { got: filled }),
                Ok(n) => filled += n,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }

        let len = u32::from_be_bytes(prefix);
        if len > self.max_frame_len {
            return Err(WireError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }

        let mut payload = vec![0u8; len as usize];
        self.stream.read_exact(&mut payload).map_err(|err| {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                WireError::TruncatedPayload {
                    expected: len as usize,
                }
            } else {
                WireError::Io(err)
            }
        })?;
        Ok(Some(payload))
    }

    /// Receive a frame, treating end-of-stream as an error.
    ///
    /// Handshake positions where a frame is mandatory use this instead of
    /// [`FrameChannel::recv`].
    pub fn recv_expected(&mut self) -> Result<Vec<u8>, WireError> {
        self.recv()?.ok_or(WireError::TruncatedPrefix { got: 0 })
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
