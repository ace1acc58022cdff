//! Client Channel Module
//!
//! The client side of a PipeHub channel: connect to a named endpoint with a
//! caller-specified timeout, then exchange whole messages. The typical
//! pattern is a single request/response round trip, but a client may hold
//! the channel open for any number of exchanges.
//!
//! ## Error Taxonomy
//!
//! Connect failures are distinguishable: a deadline that elapses before any
//! listener accepts is [`ClientError::Timeout`], a name nobody ever bound is
//! [`ClientError::NotFound`], and a socket file whose server is gone is
//! [`ClientError::Refused`]. No automatic retry happens here; retry policy
//! belongs to the caller.
//!
//! ## Example
//!
//! ```ignore
//! use pipehub::client::IpcClient;
//! use std::time::Duration;
//!
//! let mut client = IpcClient::connect("my-channel", Duration::from_secs(2)).await?;
//! client.send(b"Request #3").await?;
//! let reply = client.receive().await?;
//! println!("Server response: {}", String::from_utf8_lossy(&reply));
//! ```

use crate::channel::frame::{decode_frame, encode_frame, FrameError, HEADER_SIZE};
use crate::channel::socket_path;
use crate::server::DEFAULT_BUFFER_SIZE;
use bytes::{Bytes, BytesMut};
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::trace;

/// Errors that can occur on the client side of a channel.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No listener accepted within the deadline
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    /// Nothing is bound under this channel name
    #[error("no channel named '{0}'")]
    NotFound(String),

    /// The endpoint exists but its server is gone
    #[error("channel '{0}' refused the connection")]
    Refused(String),

    /// Framing contract violation (oversized message, truncated frame)
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Any other I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A connected client channel.
///
/// Dropping the client closes the channel; the server observes a clean EOF.
#[derive(Debug)]
pub struct IpcClient {
    stream: UnixStream,
    buf: BytesMut,
    inbound_limit: usize,
    outbound_limit: usize,
}

impl IpcClient {
    /// Connects to the named channel, failing with a distinct error if no
    /// listener accepts within `timeout`.
    pub async fn connect(name: &str, timeout: Duration) -> Result<Self, ClientError> {
        let path = socket_path(name);

        let stream = match tokio::time::timeout(timeout, UnixStream::connect(&path)).await {
            Err(_) => return Err(ClientError::Timeout(timeout)),
            Ok(Err(e)) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ClientError::NotFound(name.to_string()))
            }
            Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => {
                return Err(ClientError::Refused(name.to_string()))
            }
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(stream)) => stream,
        };

        trace!(name = name, "Connected to channel");
        Ok(Self {
            stream,
            buf: BytesMut::with_capacity(HEADER_SIZE + DEFAULT_BUFFER_SIZE),
            inbound_limit: DEFAULT_BUFFER_SIZE,
            outbound_limit: DEFAULT_BUFFER_SIZE,
        })
    }

    /// Overrides the default message size limits. Both sides must agree on
    /// them; the limits are not negotiated on the wire.
    pub fn with_limits(mut self, inbound: usize, outbound: usize) -> Self {
        self.inbound_limit = inbound;
        self.outbound_limit = outbound;
        self
    }

    /// Sends one whole message.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), ClientError> {
        if payload.len() > self.outbound_limit {
            return Err(ClientError::Frame(FrameError::MessageTooLarge {
                size: payload.len(),
                max: self.outbound_limit,
            }));
        }

        let mut framed = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        encode_frame(&mut framed, payload);
        self.stream.write_all(&framed).await?;
        Ok(())
    }

    /// Receives the next whole message from the server.
    ///
    /// An EOF before a complete frame is an error: the server went away
    /// mid-exchange.
    pub async fn receive(&mut self) -> Result<Bytes, ClientError> {
        loop {
            if let Some(payload) = decode_frame(&mut self.buf, self.inbound_limit)? {
                return Ok(payload);
            }

            let n = self.stream.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(ClientError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "server closed the channel before a full message arrived",
                )));
            }
        }
    }

    /// One request/response exchange.
    pub async fn round_trip(&mut self, payload: &[u8]) -> Result<Bytes, ClientError> {
        self.send(payload).await?;
        self.receive().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_unknown_name_is_not_found() {
        let err = IpcClient::connect("pipehub-no-such-channel", Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_connect_stale_socket_is_refused() {
        // Bind, then drop the listener but keep the socket file around.
        let name = format!("pipehub-test-refused-{}", std::process::id());
        let (listener, path) = crate::channel::bind_endpoint(&name).unwrap();
        drop(listener);
        assert!(path.exists());

        let err = IpcClient::connect(&name, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Refused(_)));

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_oversized_send_rejected_locally() {
        // The limit check happens before any connect-dependent I/O, so a
        // paired loopback stream is enough.
        let (a, _b) = UnixStream::pair().unwrap();
        let mut client = IpcClient {
            stream: a,
            buf: BytesMut::new(),
            inbound_limit: 64,
            outbound_limit: 64,
        };

        let err = client.send(&[0u8; 65]).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Frame(FrameError::MessageTooLarge { size: 65, max: 64 })
        ));
    }

    #[tokio::test]
    async fn test_receive_reports_server_gone_mid_frame() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut client = IpcClient {
            stream: a,
            buf: BytesMut::new(),
            inbound_limit: 4096,
            outbound_limit: 4096,
        };

        // Half a header, then the "server" dies.
        let mut b = b;
        b.write_all(&[0x10, 0x00]).await.unwrap();
        drop(b);

        let err = client.receive().await.unwrap_err();
        match err {
            ClientError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected Io(UnexpectedEof), got {other:?}"),
        }
    }
}
