//! Connection Registry
//!
//! The registry is the sole source of truth for which connections are live.
//! It is the only shared mutable structure in the engine: one mutex guards
//! both the connection map and the `running` flag, so "still accepting" and
//! "force close everything" can never race.
//!
//! ## Locking Discipline
//!
//! The lock is held only for brief map reads and updates around each
//! completion - never across an await, and never while waiting on I/O.
//! Accept, reap, and shutdown all take this same lock:
//!
//! - an acceptor registers a new connection only if `running` is still true
//! - the reaper iterates the map and force-closes dead peers (it never
//!   removes entries; the dispatcher's error path does the bookkeeping)
//! - shutdown flips `running` and force-closes every entry in one critical
//!   section
//!
//! ## Drain Notification
//!
//! `stop()` must not return until the registry is provably empty. Every
//! removal notifies a [`tokio::sync::Notify`]; `drained()` uses the
//! enable-before-check pattern so a removal between the emptiness check and
//! the await can never be lost. This replaces the sleep-poll loop such
//! engines traditionally use and removes its fixed-interval latency.

use crate::channel::ChannelControl;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;
use tracing::trace;

/// Opaque identifier for one live connection; the registry key.
pub type ConnectionId = u64;

/// Hands out monotonically increasing connection ids.
#[derive(Debug, Default)]
pub struct ConnectionIds {
    next: AtomicU64,
}

impl ConnectionIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> ConnectionId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

#[derive(Default)]
struct RegistryInner {
    /// True from construction until shutdown begins; flips exactly once.
    running: bool,
    conns: HashMap<ConnectionId, ChannelControl>,
}

/// The authoritative set of currently-live connections.
pub struct Registry {
    inner: Mutex<RegistryInner>,
    /// Notified on every removal so `drained()` can wake.
    drain: Notify,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                running: true,
                conns: HashMap::new(),
            }),
            drain: Notify::new(),
        }
    }

    /// Registers a freshly accepted connection, unless shutdown has begun.
    ///
    /// This is the accept-path race check: the `running` test and the insert
    /// happen under one lock acquisition, so a connection accepted after
    /// `stop()` flipped the flag is never registered and no callback for it
    /// ever fires.
    pub fn try_register(&self, id: ConnectionId, control: ChannelControl) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if !inner.running {
            return false;
        }
        inner.conns.insert(id, control);
        trace!(conn = id, live = inner.conns.len(), "Connection registered");
        true
    }

    /// Removes a connection after its cleanup has completed.
    ///
    /// Idempotent: the dispatcher owns removal, but a connection that never
    /// registered (accept lost the shutdown race) simply is not present.
    pub fn remove(&self, id: ConnectionId) -> bool {
        let removed = {
            let mut inner = self.inner.lock().unwrap();
            inner.conns.remove(&id).is_some()
        };
        if removed {
            self.drain.notify_waiters();
        }
        removed
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True until shutdown begins.
    pub fn is_running(&self) -> bool {
        self.inner.lock().unwrap().running
    }

    /// Begins shutdown: flips `running` and force-closes every registered
    /// channel in one critical section.
    ///
    /// The forced closes make every pending read complete immediately, so
    /// each connection's dispatcher runs its normal disconnect path and the
    /// registry converges to empty. Returns the number of connections closed.
    pub fn begin_shutdown(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        inner.running = false;
        for control in inner.conns.values() {
            control.force_close();
        }
        inner.conns.len()
    }

    /// Force-closes every connection whose peer has vanished.
    ///
    /// Entries are never removed here; the forced close surfaces as a read
    /// failure in the dispatcher, which does the cleanup and removal. This
    /// keeps removal single-owner and free of duplicate-removal races.
    pub fn reap_dead(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        let mut reaped = 0;
        for (id, control) in inner.conns.iter() {
            if control.peer_gone() {
                trace!(conn = *id, "Reaping dead peer");
                control.force_close();
                reaped += 1;
            }
        }
        reaped
    }

    /// Waits until the registry is empty.
    ///
    /// Enable-before-check: the notification is armed before the emptiness
    /// test, so a removal landing in between still wakes this waiter.
    pub async fn drained(&self) {
        loop {
            let notified = self.drain.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.lock().unwrap().conns.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::channel_views;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::UnixStream;

    fn test_control() -> (ChannelControl, UnixStream) {
        let (a, b) = UnixStream::pair().unwrap();
        let (_r, _w, control) = channel_views(a, 4096, 4096);
        (control, b)
    }

    #[tokio::test]
    async fn test_register_and_remove() {
        let registry = Registry::new();
        let (control, _peer) = test_control();

        assert!(registry.try_register(1, control));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(1));
        assert!(registry.is_empty());

        // Second removal is a no-op
        assert!(!registry.remove(1));
    }

    #[tokio::test]
    async fn test_registration_refused_after_shutdown() {
        let registry = Registry::new();
        let (c1, _p1) = test_control();
        let (c2, _p2) = test_control();

        assert!(registry.try_register(1, c1));
        assert_eq!(registry.begin_shutdown(), 1);
        assert!(!registry.is_running());

        // The accept-path race: too late to register
        assert!(!registry.try_register(2, c2));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_drained_wakes_on_last_removal() {
        let registry = Arc::new(Registry::new());
        let (control, _peer) = test_control();
        registry.try_register(1, control);

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.drained().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        registry.remove(1);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("drained() must return once the registry empties")
            .unwrap();
    }

    #[tokio::test]
    async fn test_drained_returns_immediately_when_empty() {
        let registry = Registry::new();
        tokio::time::timeout(Duration::from_millis(100), registry.drained())
            .await
            .expect("empty registry drains immediately");
    }

    #[tokio::test]
    async fn test_reap_closes_dead_peers_but_keeps_entries() {
        let registry = Registry::new();

        let (alive, _alive_peer) = test_control();
        let (dead, dead_peer) = test_control();
        registry.try_register(1, alive);
        registry.try_register(2, dead);

        drop(dead_peer);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(registry.reap_dead(), 1);
        // Removal belongs to the dispatcher, not the reaper
        assert_eq!(registry.len(), 2);
    }
}
