//! # PipeHub - An Asynchronous Local IPC Server Engine
//!
//! PipeHub serves a named, message-framed local channel: it accepts any
//! number of concurrent client connections, dispatches each inbound message
//! to application-supplied handler callbacks, and writes responses back,
//! never blocking a caller thread on any single connection.
//!
//! ## Features
//!
//! - **Named Channels**: one string names the endpoint; clients connect by
//!   name with a caller-chosen timeout
//! - **Message Framing**: whole messages in, whole messages out - the
//!   channel layer preserves write boundaries so neither side counts bytes
//! - **Lifecycle Engine**: acceptor pool, locked connection registry,
//!   dead-peer reaper, and a shutdown that provably drains every connection
//! - **Async I/O**: Built on Tokio; one dispatch task and one writer task
//!   per connection, no global lock on the message path
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               PipeHub                                   │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │  Acceptor   │───>│  Registry   │───>│  Dispatch   │                  │
//! │  │  Pool (N)   │    │ (one mutex) │    │  Task       │                  │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘                  │
//! │                            ▲                  │                         │
//! │                            │                  ▼                         │
//! │  ┌─────────────┐    ┌──────┴──────┐    ┌─────────────┐                  │
//! │  │   Framing   │    │   Reaper    │    │ IpcHandler  │                  │
//! │  │   Codec     │    │ (interval   │    │ callbacks   │                  │
//! │  │ (len-prefix)│    │  sweep)     │    │ (app code)  │                  │
//! │  └─────────────┘    └─────────────┘    └─────────────┘                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use pipehub::{IpcClient, IpcHandler, IpcServer, ServerConfig};
//! use pipehub::server::ConnectionHandle;
//! use bytes::Bytes;
//! use std::time::Duration;
//!
//! struct Uppercase;
//!
//! impl IpcHandler for Uppercase {
//!     type State = ();
//!     fn on_connect(&self, _conn: &ConnectionHandle) {}
//!     fn on_message(&self, conn: &ConnectionHandle, message: &[u8], _state: &mut ()) {
//!         let _ = conn.send(Bytes::from(message.to_ascii_uppercase()));
//!     }
//!     fn on_disconnect(&self, _conn: &ConnectionHandle, _state: ()) {}
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = IpcServer::start(ServerConfig::new("example-channel"), Uppercase)?;
//!
//!     let mut client = IpcClient::connect("example-channel", Duration::from_secs(2)).await?;
//!     let reply = client.round_trip(b"Request #3").await?;
//!     assert_eq!(&reply[..], b"REQUEST #3");
//!
//!     server.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`channel`]: named endpoints, framing codec, per-connection socket views
//! - [`handler`]: the callback capability set applications implement
//! - [`server`]: the lifecycle engine (acceptors, registry, reaper, shutdown)
//! - [`client`]: the connect/send/receive side of a channel
//!
//! ## Design Highlights
//!
//! ### One Lock, Held Briefly
//!
//! The connection registry's mutex is the only shared lock. It guards both
//! the live-connection map and the `running` flag, so accepting and shutting
//! down can never race; it is never held across an await.
//!
//! ### One Disconnect Path
//!
//! Clean EOF, broken sockets, oversized frames, the reaper, and `stop()` all
//! end a connection the same way: the pending read completes, `on_disconnect`
//! fires exactly once with the connection's state, and the registry entry is
//! removed last. `stop()` returns only when the registry is empty.
//!
//! ### Fixed Maximum Frame
//!
//! This is a message-oriented channel, not a stream multiplexer: any message
//! beyond the configured buffer size is rejected as a contract violation,
//! never truncated or buffered.

pub mod channel;
pub mod client;
pub mod handler;
pub mod server;

// Re-export commonly used types for convenience
pub use channel::{EndpointError, FrameError};
pub use client::{ClientError, IpcClient};
pub use handler::IpcHandler;
pub use server::{
    ConnectionHandle, IpcServer, SendError, ServerConfig, ServerError, ServerStats,
    DEFAULT_BUFFER_SIZE, DEFAULT_LISTENER_POOL, DEFAULT_REAP_INTERVAL,
};

/// The default channel name the demo binary serves on
pub const DEFAULT_CHANNEL: &str = "pipehub-demo";

/// Version of PipeHub
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
