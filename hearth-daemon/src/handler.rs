//! Server side of one client connection.
//!
//! State machine: `AwaitingVerb → … → Dispatching → Replied → Closed`.
//! Any error path reaches `Closed` through the same scoped cleanup: the
//! reply (or the reserved 255) goes out first, then every descriptor
//! received from the client is closed along with the channel itself.

use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use hearth_wire::{fdpass, FrameChannel};

use crate::error::DaemonError;
use crate::protocol::{self, ExecuteRequest, ABNORMAL_CLOSE_REPLY, EXECUTE_VERB};

/// Handles exactly one client connection.
pub struct Handler {
    channel: FrameChannel<UnixStream>,
    received: Vec<OwnedFd>,
    decoded: bool,
    replied: bool,
}

impl Handler {
    pub fn new(stream: UnixStream) -> Self {
        Self {
            channel: FrameChannel::new(stream),
            received: Vec::with_capacity(3),
            decoded: false,
            replied: false,
        }
    }

    /// Decode one execute request.
    ///
    /// Reads the verb, cwd, and argv frames, then the three descriptors
    /// interleaved with their sentinel frames. Received descriptors are
    /// retained on the handler and stay open until it closes; the request
    /// record carries raw views of them.
    pub fn receive(&mut self) -> Result<ExecuteRequest, DaemonError> {
        let verb = self.channel.recv_expected()?;
        if verb != EXECUTE_VERB {
            return Err(DaemonError::UnsupportedRequest {
                verb: String::from_utf8_lossy(&verb).into_owned(),
            });
        }

        let cwd_frame = self.channel.recv_expected()?;
        let cwd = String::from_utf8(cwd_frame)
            .map(PathBuf::from)
            .map_err(|_| DaemonError::Protocol("cwd frame is not valid UTF-8".to_string()))?;

        let argv = protocol::split_argv(&self.channel.recv_expected()?)?;

        let socket_fd = self.channel.as_raw_fd();
        for _ in 0..3 {
            let fd = fdpass::recv_fd(socket_fd)?;
            self.received.push(fd);
            // The sentinel frame confirms the transfer; contents are opaque.
            self.channel.recv_expected()?;
        }

        self.decoded = true;
        Ok(ExecuteRequest {
            cwd,
            argv,
            stdin: self.received[0].as_raw_fd(),
            stdout: self.received[1].as_raw_fd(),
            stderr: self.received[2].as_raw_fd(),
        })
    }

    /// Send the reply frame. Codes outside 0..=254 are rejected; 255 is
    /// reserved for abnormal close and never sent through here.
    pub fn send_exit_code(&mut self, code: i32) -> Result<(), DaemonError> {
        let reply = protocol::encode_exit_code(code)?;
        // Past this point the handler counts as replied even if the write
        // fails — the drop path must not follow up with a 255.
        self.replied = true;
        self.channel.send(&reply)?;
        Ok(())
    }

    /// Send the exit code, then close every received descriptor and the
    /// channel. The close pass runs on every exit path, including a failed
    /// send — descriptor teardown rides the handler's drop.
    pub fn close_with_exit_code(mut self, code: i32) -> Result<(), DaemonError> {
        self.send_exit_code(code)
    }
}

impl Drop for Handler {
    fn drop(&mut self) {
        if self.decoded && !self.replied {
            // Worker scope left without a reply: signal abnormal close.
            let _ = self.channel.send(ABNORMAL_CLOSE_REPLY);
        }
        // `received` and the channel close here, in every case.
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use std::fs::File;
    use std::io::{Read, Seek, SeekFrom, Write};
    use std::os::fd::{AsFd, BorrowedFd};
    use std::path::Path;
    use std::thread;

    fn connected() -> (UnixStream, Handler) {
        let (client_end, server_end) = UnixStream::pair().expect("socketpair");
        (client_end, Handler::new(server_end))
    }

    fn run_client(
        stream: UnixStream,
        cwd: &'static str,
        argv: &'static [&'static str],
    ) -> thread::JoinHandle<Result<i32, DaemonError>> {
        thread::spawn(move || {
            let stdin = File::open("/dev/null").expect("open /dev/null");
            let stdout = tempfile::tempfile().expect("stdout file");
            let stderr = tempfile::tempfile().expect("stderr file");
            let argv: Vec<String> = argv.iter().map(|s| s.to_string()).collect();

            let mut client = Client::from_stream(stream);
            client.execute(
                Path::new(cwd),
                &argv,
                stdin.as_fd(),
                stdout.as_fd(),
                stderr.as_fd(),
            )
        })
    }

    #[test]
    fn execute_handshake_decodes_request_and_returns_code() {
        let (client_end, mut handler) = connected();
        let client = run_client(client_end, "/tmp", &["echo", "hi"]);

        let request = handler.receive().expect("receive request");
        assert_eq!(request.cwd, PathBuf::from("/tmp"));
        assert_eq!(request.argv, vec!["echo".to_string(), "hi".to_string()]);

        // Write through the received stdout descriptor to prove it is live.
        let stdout = unsafe { BorrowedFd::borrow_raw(request.stdout) };
        let mut out = File::from(stdout.try_clone_to_owned().expect("dup stdout"));
        out.write_all(b"hi\n").expect("write to client stdout");

        handler.close_with_exit_code(0).expect("close with code");

        let code = client.join().expect("client thread").expect("exit code");
        assert_eq!(code, 0);

        // The client's stdout file observed the handler's write.
        let mut replayed = out;
        replayed.seek(SeekFrom::Start(0)).expect("rewind");
        let mut content = String::new();
        replayed.read_to_string(&mut content).expect("read back");
        assert_eq!(content, "hi\n");
    }

    #[test]
    fn nonzero_exit_code_travels_back() {
        let (client_end, mut handler) = connected();
        let client = run_client(client_end, "/", &["true"]);

        handler.receive().expect("receive request");
        handler.close_with_exit_code(76).expect("close with code");

        let code = client.join().expect("client thread").expect("exit code");
        assert_eq!(code, 76);
    }

    #[test]
    fn unknown_verb_is_rejected() {
        let (client_end, mut handler) = connected();
        let mut channel = FrameChannel::new(client_end);
        channel.send(b"/v1/shutdown").expect("send bogus verb");

        match handler.receive() {
            Err(DaemonError::UnsupportedRequest { verb }) => {
                assert_eq!(verb, "/v1/shutdown");
            }
            other => panic!("expected UnsupportedRequest, got {other:?}"),
        }
    }

    #[test]
    fn client_hangup_mid_handshake_surfaces_as_wire_error() {
        let (client_end, mut handler) = connected();
        let mut channel = FrameChannel::new(client_end);
        channel.send(EXECUTE_VERB).expect("send verb");
        channel.send(b"/tmp").expect("send cwd");
        drop(channel);

        assert!(matches!(handler.receive(), Err(DaemonError::Wire(_))));
    }

    #[test]
    fn dropping_a_decoded_handler_sends_the_reserved_reply() {
        let (client_end, mut handler) = connected();
        let client = run_client(client_end, "/tmp", &["echo"]);

        handler.receive().expect("receive request");
        drop(handler);

        // "255" is never a legal application code, so the client reports it
        // as a protocol error.
        match client.join().expect("client thread") {
            Err(DaemonError::Protocol(msg)) => assert!(msg.contains("255"), "got: {msg}"),
            other => panic!("expected Protocol error, got {other:?}"),
        }
    }

    #[test]
    fn dropping_before_decode_stays_silent() {
        let (client_end, handler) = connected();
        drop(handler);

        // The client's next receive sees a clean end-of-stream, not a 255.
        let mut channel = FrameChannel::new(client_end);
        assert!(channel.recv().expect("recv").is_none());
    }

    #[test]
    fn out_of_range_exit_codes_are_rejected() {
        let (_client_end, mut handler) = connected();
        assert!(matches!(
            handler.send_exit_code(255),
            Err(DaemonError::InvalidExitCode { code: 255 })
        ));
        assert!(matches!(
            handler.send_exit_code(-1),
            Err(DaemonError::InvalidExitCode { code: -1 })
        ));
    }

    #[test]
    fn empty_argv_decodes_to_one_empty_element() {
        let (client_end, mut handler) = connected();
        let client = run_client(client_end, "/tmp", &[""]);

        let request = handler.receive().expect("receive request");
        assert_eq!(request.argv, vec![String::new()]);

        handler.close_with_exit_code(0).expect("close");
        client.join().expect("client thread").expect("exit code");
    }

    // Drop must close the received descriptors: hand a pipe's write end to
    // the handler, drop it, and watch the read end hit EOF.
    #[test]
    fn close_releases_received_descriptors() {
        let (client_end, mut handler) = connected();

        let (mut pipe_read, pipe_write) = {
            let (r, w) = std::os::unix::net::UnixStream::pair().expect("fd pair");
            (r, w)
        };

        let client = thread::spawn(move || {
            let mut client = Client::from_stream(client_end);
            let argv = vec!["probe".to_string()];
            client.execute(
                Path::new("/"),
                &argv,
                pipe_write.as_fd(),
                pipe_write.as_fd(),
                pipe_write.as_fd(),
            )
        });

        handler.receive().expect("receive request");
        handler.close_with_exit_code(0).expect("close");
        client.join().expect("client thread").expect("exit code");

        // All duplicated write ends are now closed on both sides.
        let mut buf = [0u8; 1];
        let n = pipe_read.read(&mut buf).expect("read");
        assert_eq!(n, 0, "read end should see EOF once every copy is closed");
    }
}
