//! Channel Transport Module
//!
//! This module provides the named, message-framed channel primitive the
//! engine is built on: endpoint binding with the fixed access policy, the
//! length-prefix framing codec, and the per-connection reader/writer/control
//! views.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Named Endpoint                          │
//! │          ($XDG_RUNTIME_DIR/<name>.sock, mode 0666)          │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │ accept()
//!                        ▼
//!            ┌───────────────────────┐
//!            │   One UnixStream      │
//!            │   (Arc, shared)       │
//!            └───────────┬───────────┘
//!                        │ channel_views()
//!         ┌──────────────┼──────────────────┐
//!         ▼              ▼                  ▼
//! ┌───────────────┐ ┌───────────────┐ ┌────────────────┐
//! │ MessageReader │ │ MessageWriter │ │ ChannelControl │
//! │ (dispatcher)  │ │ (writer task) │ │ (registry)     │
//! └───────────────┘ └───────────────┘ └────────────────┘
//! ```
//!
//! ## Framing
//!
//! Each message travels as a 4-byte little-endian length prefix followed by
//! the payload. The codec is incremental, so partial reads and pipelined
//! messages both work; handlers and clients only ever see whole messages.

pub mod endpoint;
pub mod frame;

// Re-export commonly used types
pub use endpoint::{
    bind_endpoint, channel_views, socket_path, ChannelControl, EndpointError, MessageReader,
    MessageWriter, ENDPOINT_MODE,
};
pub use frame::{decode_frame, encode_frame, FrameError, FrameResult, HEADER_SIZE};
