//! Handler Callback Module
//!
//! This module defines the capability set an application implements to
//! receive connection lifecycle events. One handler instance serves every
//! connection of a server; per-connection data lives in the associated
//! `State` type, which the engine threads through the callbacks without ever
//! inspecting it.
//!
//! ## Callback Guarantees
//!
//! - `on_connect` fires before any `on_message` or `on_disconnect` for that
//!   connection
//! - `on_message` calls for one connection arrive in the order the client
//!   sent them (no ordering is guaranteed across connections)
//! - `on_disconnect` fires exactly once per connected handle, whichever path
//!   ends the connection: clean close, broken socket, the reaper, or server
//!   shutdown - and consumes the state, so firing twice cannot compile
//! - After `stop()` returns, no callback for that server fires again
//!
//! ## Writing Responses
//!
//! Callbacks are synchronous; responses go through
//! [`ConnectionHandle::send`](crate::server::ConnectionHandle::send), which
//! queues the message and returns immediately (writes are fire-and-forget
//! from the handler's point of view). A failed write tears the connection
//! down through the normal disconnect path.
//!
//! ## Example
//!
//! ```ignore
//! use pipehub::handler::IpcHandler;
//! use pipehub::server::ConnectionHandle;
//! use bytes::Bytes;
//!
//! struct Uppercase;
//!
//! impl IpcHandler for Uppercase {
//!     type State = u64;
//!
//!     fn on_connect(&self, conn: &ConnectionHandle) -> u64 {
//!         conn.id()
//!     }
//!
//!     fn on_message(&self, conn: &ConnectionHandle, message: &[u8], _state: &mut u64) {
//!         let reply = message.to_ascii_uppercase();
//!         let _ = conn.send(Bytes::from(reply));
//!     }
//!
//!     fn on_disconnect(&self, _conn: &ConnectionHandle, _state: u64) {}
//! }
//! ```

use crate::server::ConnectionHandle;

/// The callback capability set implemented by the application.
///
/// Exactly one implementation is live per server instance; the engine invokes
/// it, never application code directly. Handlers must treat `on_disconnect`
/// after a forced close as a hard cancellation notice: no further I/O on that
/// handle will succeed.
pub trait IpcHandler: Send + Sync + 'static {
    /// Opaque per-connection state produced by `on_connect` and threaded
    /// through every subsequent callback for that connection.
    type State: Send + 'static;

    /// A client connected. The returned state accompanies every later
    /// callback for this handle.
    fn on_connect(&self, conn: &ConnectionHandle) -> Self::State;

    /// One whole inbound message arrived. Messages on a single connection are
    /// delivered strictly in send order.
    fn on_message(&self, conn: &ConnectionHandle, message: &[u8], state: &mut Self::State);

    /// The connection ended. Consumes the state; fires exactly once per
    /// connected handle.
    fn on_disconnect(&self, conn: &ConnectionHandle, state: Self::State);
}
