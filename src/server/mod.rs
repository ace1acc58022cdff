//! Server Engine Module
//!
//! The connection lifecycle engine: an acceptor pool that keeps listeners
//! armed, a locked registry of live connections, per-connection dispatch
//! tasks, a periodic dead-peer reaper, and a deterministic shutdown
//! coordinator.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       IpcServer                             │
//! │                                                             │
//! │  ┌───────────┐ ┌───────────┐ ┌───────────┐                  │
//! │  │ Acceptor 0│ │ Acceptor 1│ │ ...pool   │  (N accepts      │
//! │  └─────┬─────┘ └─────┬─────┘ └─────┬─────┘   always armed)  │
//! │        └─────────────┼─────────────┘                        │
//! │                      ▼                                      │
//! │          ┌──────────────────────┐        ┌───────────────┐  │
//! │          │      Registry        │◄───────│    Reaper     │  │
//! │          │  Mutex { running,    │ sweep  │ (interval     │  │
//! │          │    conns: id→ctrl }  │        │  tokio task)  │  │
//! │          └──────────┬───────────┘        └───────────────┘  │
//! │                     │ per connection                        │
//! │                     ▼                                       │
//! │  ┌─────────────────────────────────────────────────┐        │
//! │  │ dispatch task: on_connect → recv → on_message…  │        │
//! │  │ writer task:   outbound queue → socket          │        │
//! │  └─────────────────────────────────────────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency Discipline
//!
//! The registry mutex is the only shared lock, taken briefly by acceptors
//! (admission check), the reaper (sweep), dispatchers (removal), and
//! `stop()` (flip running + force-close all). It is never held across an
//! await. Per-connection message handling runs without any global lock, and
//! reads on one connection never overlap, which preserves message order.

pub mod engine;
pub mod reaper;
pub mod registry;

// Re-export commonly used types
pub use engine::{
    ConnectionHandle, IpcServer, SendError, ServerConfig, ServerError, ServerStats,
    DEFAULT_BUFFER_SIZE, DEFAULT_LISTENER_POOL, DEFAULT_REAP_INTERVAL,
};
pub use reaper::Reaper;
pub use registry::{ConnectionId, ConnectionIds, Registry};
