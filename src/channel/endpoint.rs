//! Channel Endpoints
//!
//! This module binds named listening endpoints and wraps accepted sockets in
//! the three views the engine needs: a reader for the dispatch loop, a writer
//! for the outbound queue, and a control handle for the registry.
//!
//! ## Why Three Views?
//!
//! The dispatcher reads, the writer task writes, and the registry must be able
//! to force-close or liveness-probe a connection it does not otherwise touch.
//! All three share one `Arc<UnixStream>` and use readiness-based I/O
//! (`readable()` / `try_read`), so no view needs exclusive ownership of the
//! socket and the raw fd stays valid for exactly as long as any view is alive.
//!
//! ## Name Resolution
//!
//! A channel name maps to a socket path under `$XDG_RUNTIME_DIR` (falling back
//! to the system temp directory). A name containing `/` is treated as a path
//! verbatim. After binding, the socket file mode is set to `0o666`: the owner
//! keeps full control through file ownership and any authenticated local user
//! gets read/write - the fixed two-rule access policy.
//!
//! ## Forced Close and the Liveness Probe
//!
//! `ChannelControl::force_close` calls `shutdown(2)` on the fd rather than
//! closing it, so a read pending in another task completes immediately with
//! EOF and cleanup flows through the normal disconnect path.
//! `ChannelControl::peer_gone` peeks one byte with `MSG_PEEK | MSG_DONTWAIT`:
//! a readable socket with zero bytes means the peer vanished without a close
//! handshake reaching the engine yet.

use crate::channel::frame::{decode_frame, encode_frame, FrameError, HEADER_SIZE};
use bytes::{Buf, Bytes, BytesMut};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::Interest;
use tokio::net::{UnixListener, UnixStream};

/// File mode applied to the socket after binding (owner full control via
/// ownership, any local user read/write).
pub const ENDPOINT_MODE: u32 = 0o666;

/// Errors that can occur while binding a named endpoint.
#[derive(Debug, Error)]
pub enum EndpointError {
    /// Another live process already serves this channel name
    #[error("channel name '{name}' is already bound by another process")]
    AlreadyBound { name: String },

    /// Bind, permission, or filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Resolves a channel name to its socket path.
///
/// Names containing `/` are used verbatim; bare names land in
/// `$XDG_RUNTIME_DIR` or the temp directory.
pub fn socket_path(name: &str) -> PathBuf {
    if name.contains('/') {
        return PathBuf::from(name);
    }
    let dir = std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);
    dir.join(format!("{name}.sock"))
}

/// Binds a listening endpoint for `name`.
///
/// If the path is occupied, a probe connect distinguishes a live server
/// (construction fails fast with [`EndpointError::AlreadyBound`]) from a
/// stale socket file left by a dead process (removed, bind retried).
pub fn bind_endpoint(name: &str) -> Result<(UnixListener, PathBuf), EndpointError> {
    let path = socket_path(name);

    let listener = match UnixListener::bind(&path) {
        Ok(listener) => listener,
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
            // A live server accepts the probe; a leftover file refuses it.
            match std::os::unix::net::UnixStream::connect(&path) {
                Ok(_) => {
                    return Err(EndpointError::AlreadyBound {
                        name: name.to_string(),
                    })
                }
                Err(_) => {
                    std::fs::remove_file(&path)?;
                    UnixListener::bind(&path)?
                }
            }
        }
        Err(e) => return Err(e.into()),
    };

    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(ENDPOINT_MODE))?;
    Ok((listener, path))
}

/// Splits an accepted stream into the engine's three channel views.
pub fn channel_views(
    stream: UnixStream,
    inbound_limit: usize,
    outbound_limit: usize,
) -> (MessageReader, MessageWriter, ChannelControl) {
    let stream = Arc::new(stream);
    (
        MessageReader {
            stream: Arc::clone(&stream),
            buf: BytesMut::with_capacity(HEADER_SIZE + inbound_limit),
            max_len: inbound_limit,
        },
        MessageWriter {
            stream: Arc::clone(&stream),
            max_len: outbound_limit,
        },
        ChannelControl { stream },
    )
}

/// The read view of a connection: yields whole inbound messages.
///
/// The accumulation buffer is allocated once, sized to the inbound limit, and
/// reused for every read on the connection.
pub struct MessageReader {
    stream: Arc<UnixStream>,
    buf: BytesMut,
    max_len: usize,
}

impl MessageReader {
    /// Receives the next whole message.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(payload))` - One complete message
    /// - `Ok(None)` - The peer closed cleanly (EOF on a frame boundary)
    /// - `Err(e)` - Broken connection, forced close, or framing violation
    pub async fn recv(&mut self) -> io::Result<Option<Bytes>> {
        loop {
            match decode_frame(&mut self.buf, self.max_len) {
                Ok(Some(payload)) => return Ok(Some(payload)),
                Ok(None) => {}
                Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
            }

            self.stream.readable().await?;
            match self.stream.try_read_buf(&mut self.buf) {
                Ok(0) => {
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                    // EOF mid-frame. With a complete header the shortfall is
                    // measured against the advertised frame length; otherwise
                    // against the header itself.
                    let expected = if self.buf.len() >= HEADER_SIZE {
                        let advertised = u32::from_le_bytes([
                            self.buf[0],
                            self.buf[1],
                            self.buf[2],
                            self.buf[3],
                        ]) as usize;
                        (HEADER_SIZE + advertised).saturating_sub(self.buf.len())
                    } else {
                        HEADER_SIZE - self.buf.len()
                    };
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        FrameError::Truncated { expected },
                    ));
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
        }
    }
}

/// The write view of a connection: frames and writes one message per call.
pub struct MessageWriter {
    stream: Arc<UnixStream>,
    max_len: usize,
}

impl MessageWriter {
    /// Writes one framed message, rejecting payloads above the outbound limit.
    pub async fn send(&self, payload: &[u8]) -> io::Result<()> {
        if payload.len() > self.max_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                FrameError::MessageTooLarge {
                    size: payload.len(),
                    max: self.max_len,
                },
            ));
        }

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        encode_frame(&mut buf, payload);

        while buf.has_remaining() {
            self.stream.writable().await?;
            match self.stream.try_write(buf.chunk()) {
                Ok(n) => buf.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// The registry's view of a connection: forced close and liveness probing.
///
/// Cloneable and cheap; holds the socket alive but never reads or writes
/// application data.
#[derive(Clone)]
pub struct ChannelControl {
    stream: Arc<UnixStream>,
}

impl ChannelControl {
    /// Forces the connection closed.
    ///
    /// Shuts down both directions of the socket so a read pending in the
    /// dispatch task completes immediately. Idempotent; errors are ignored
    /// because the socket may already be gone.
    pub fn force_close(&self) {
        // SAFETY: shutdown on a valid fd; the Arc keeps the fd alive.
        unsafe {
            let _ = libc::shutdown(self.stream.as_raw_fd(), libc::SHUT_RDWR);
        }
    }

    /// Returns true if the peer has vanished.
    ///
    /// Non-destructive: peeks one byte without consuming it, so the probe
    /// never races the dispatcher's reads.
    pub fn peer_gone(&self) -> bool {
        let fd = self.stream.as_raw_fd();
        let result = self.stream.try_io(Interest::READABLE, || {
            let mut probe = [0u8; 1];
            // SAFETY: recv with MSG_PEEK on a valid fd into a local buffer.
            let n = unsafe {
                libc::recv(
                    fd,
                    probe.as_mut_ptr().cast(),
                    1,
                    libc::MSG_PEEK | libc::MSG_DONTWAIT,
                )
            };
            if n < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(n as usize)
            }
        });

        match result {
            // Readable with zero bytes: the peer end is gone.
            Ok(0) => true,
            Ok(_) => false,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => false,
            Err(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_path_bare_name() {
        let path = socket_path("demo-channel");
        assert!(path.to_string_lossy().ends_with("demo-channel.sock"));
    }

    #[test]
    fn test_socket_path_verbatim() {
        let path = socket_path("/tmp/explicit.sock");
        assert_eq!(path, PathBuf::from("/tmp/explicit.sock"));
    }

    #[tokio::test]
    async fn test_pair_roundtrip() {
        let (a, b) = UnixStream::pair().unwrap();
        let (mut reader, _wa, _ca) = channel_views(a, 4096, 4096);
        let (_rb, writer, _cb) = channel_views(b, 4096, 4096);

        writer.send(b"ping").await.unwrap();
        let msg = reader.recv().await.unwrap().unwrap();
        assert_eq!(&msg[..], b"ping");
    }

    #[tokio::test]
    async fn test_message_boundaries_preserved() {
        let (a, b) = UnixStream::pair().unwrap();
        let (mut reader, _wa, _ca) = channel_views(a, 4096, 4096);
        let (_rb, writer, _cb) = channel_views(b, 4096, 4096);

        writer.send(b"one").await.unwrap();
        writer.send(b"two").await.unwrap();

        assert_eq!(&reader.recv().await.unwrap().unwrap()[..], b"one");
        assert_eq!(&reader.recv().await.unwrap().unwrap()[..], b"two");
    }

    #[tokio::test]
    async fn test_clean_eof() {
        let (a, b) = UnixStream::pair().unwrap();
        let (mut reader, _wa, _ca) = channel_views(a, 4096, 4096);
        drop(b);

        assert!(reader.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_mid_payload_reports_payload_shortfall() {
        use tokio::io::AsyncWriteExt;

        let (a, b) = UnixStream::pair().unwrap();
        let (mut reader, _w, _c) = channel_views(a, 4096, 4096);

        // Full header advertising 16 bytes, only 4 delivered, then the peer
        // dies.
        let mut raw = Vec::new();
        raw.extend_from_slice(&16u32.to_le_bytes());
        raw.extend_from_slice(b"abcd");
        let mut b = b;
        b.write_all(&raw).await.unwrap();
        drop(b);

        let err = reader.recv().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        let frame_err = err
            .get_ref()
            .and_then(|e| e.downcast_ref::<FrameError>())
            .unwrap();
        assert_eq!(*frame_err, FrameError::Truncated { expected: 12 });
    }

    #[tokio::test]
    async fn test_eof_mid_header_reports_header_shortfall() {
        use tokio::io::AsyncWriteExt;

        let (a, b) = UnixStream::pair().unwrap();
        let (mut reader, _w, _c) = channel_views(a, 4096, 4096);

        let mut b = b;
        b.write_all(&[0x10, 0x00]).await.unwrap();
        drop(b);

        let err = reader.recv().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        let frame_err = err
            .get_ref()
            .and_then(|e| e.downcast_ref::<FrameError>())
            .unwrap();
        assert_eq!(*frame_err, FrameError::Truncated { expected: 2 });
    }

    #[tokio::test]
    async fn test_oversized_send_rejected() {
        let (a, _b) = UnixStream::pair().unwrap();
        let (_r, writer, _c) = channel_views(a, 4096, 16);

        let err = writer.send(&[0u8; 17]).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_force_close_unblocks_reader() {
        let (a, _b) = UnixStream::pair().unwrap();
        let (mut reader, _w, control) = channel_views(a, 4096, 4096);

        let read = tokio::spawn(async move { reader.recv().await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        control.force_close();

        // A forced close surfaces as EOF on the pending read.
        let result = read.await.unwrap().unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_peer_gone_probe() {
        let (a, b) = UnixStream::pair().unwrap();
        let (_r, _w, control) = channel_views(a, 4096, 4096);

        assert!(!control.peer_gone());
        drop(b);

        // Readiness delivery is not instantaneous.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(control.peer_gone());
    }

    #[tokio::test]
    async fn test_peer_with_pending_data_is_alive() {
        let (a, b) = UnixStream::pair().unwrap();
        let (_r, _w, control) = channel_views(a, 4096, 4096);
        let (_rb, writer, _cb) = channel_views(b, 4096, 4096);

        writer.send(b"buffered").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // Unread data means the connection is still live even though the
        // socket is readable.
        assert!(!control.peer_gone());
    }

    #[tokio::test]
    async fn test_bind_rejects_second_server() {
        let name = format!("pipehub-test-bind-{}", std::process::id());
        let (_listener, path) = bind_endpoint(&name).unwrap();

        match bind_endpoint(&name) {
            Err(EndpointError::AlreadyBound { .. }) => {}
            other => panic!("expected AlreadyBound, got {other:?}"),
        }

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_bind_reclaims_stale_socket() {
        let name = format!("pipehub-test-stale-{}", std::process::id());
        let path = {
            let (listener, path) = bind_endpoint(&name).unwrap();
            drop(listener);
            path
        };
        // The socket file outlives the dead listener.
        assert!(path.exists());

        let (_listener, path) = bind_endpoint(&name).unwrap();
        let _ = std::fs::remove_file(path);
    }
}
