//! SCM_RIGHTS descriptor transfer over a Unix-domain stream socket.
//!
//! Each transfer moves exactly one descriptor and consumes exactly one byte
//! of the socket's byte stream: the kernel requires at least one byte of
//! real data to carry ancillary payload, and a fixed single-byte carrier
//! keeps the framed stream around it deterministic. The receiving process
//! gets a fresh descriptor number referring to the same open file
//! description; both sides may close independently.

use std::io::{IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use nix::cmsg_space;
use nix::sys::socket::{
    recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags,
};

use crate::error::WireError;

/// Byte sent alongside the SCM_RIGHTS control message.
const CARRIER: [u8; 1] = [0x1];

/// Send `fd` across `socket` as ancillary data.
pub fn send_fd(socket: RawFd, fd: BorrowedFd<'_>) -> Result<(), WireError> {
    let iov = [IoSlice::new(&CARRIER)];
    let fds = [fd.as_raw_fd()];
    let cmsg = [ControlMessage::ScmRights(&fds)];
    sendmsg::<()>(socket, &iov, &cmsg, MsgFlags::empty(), None)?;
    Ok(())
}

/// Receive one descriptor from `socket`.
///
/// Reads the single carrier byte and extracts the descriptor from the
/// accompanying control message. The returned [`OwnedFd`] is owned by the
/// caller and closed on drop.
pub fn recv_fd(socket: RawFd) -> Result<OwnedFd, WireError> {
    let mut carrier = [0u8; 1];
    let mut iov = [IoSliceMut::new(&mut carrier)];
    let mut cmsg_buffer = cmsg_space!([RawFd; 1]);

    let msg = recvmsg::<()>(socket, &mut iov, Some(&mut cmsg_buffer), MsgFlags::empty())?;
    if msg.bytes == 0 {
        // Peer closed where a descriptor transfer was expected.
        return Err(WireError::MissingDescriptor);
    }

    for cmsg in msg.cmsgs()? {
        if let ControlMessageOwned::ScmRights(fds) = cmsg {
            if let Some(&fd) = fds.first() {
                // SAFETY: the kernel just installed this descriptor into our
                // process for us; nothing else owns it yet.
                return Ok(unsafe { OwnedFd::from_raw_fd(fd) });
            }
        }
    }

    Err(WireError::MissingDescriptor)
}

// ─── Tests ────────────────────────────────────────────────────────────────────
