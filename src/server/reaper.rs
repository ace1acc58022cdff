//! Dead-Peer Reaper
//!
//! A connection whose remote end vanished without a clean close can sit in
//! the registry with no pending read to surface the failure (for example
//! while the handler is busy inside `on_message`). The reaper is a background
//! task that periodically sweeps the registry and force-closes such
//! connections so the registry converges to reality.
//!
//! ## Design
//!
//! The reaper runs as a Tokio task and:
//! 1. Sleeps for the configured interval (default: 5s)
//! 2. Wakes up and probes every registered connection for a vanished peer
//! 3. Force-closes the dead ones
//! 4. Logs how many it swept
//!
//! It never removes registry entries itself: a forced close surfaces as a
//! read failure in that connection's dispatcher, which runs the one and only
//! disconnect path. That keeps removal single-owner and makes "reaped" and
//! "read failed" indistinguishable to the handler, as they should be.

use crate::server::engine::ServerStats;
use crate::server::registry::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// A handle to the running reaper.
///
/// When this handle is dropped, the reaper task will be stopped.
#[derive(Debug)]
pub struct Reaper {
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,
}

impl Reaper {
    /// Starts the reaper as a background task.
    ///
    /// Returns a handle that can be used to stop it; the task also stops
    /// automatically when the handle is dropped.
    pub fn start(registry: Arc<Registry>, interval: Duration, stats: Arc<ServerStats>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(reap_loop(registry, interval, stats, shutdown_rx));

        info!(interval_ms = interval.as_millis() as u64, "Reaper started");

        Self { shutdown_tx }
    }

    /// Stops the reaper.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The main reaper loop.
async fn reap_loop(
    registry: Arc<Registry>,
    interval: Duration,
    stats: Arc<ServerStats>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        // Wait for the interval or shutdown signal
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Reaper received shutdown signal");
                    return;
                }
            }
        }

        let reaped = registry.reap_dead();
        if reaped > 0 {
            stats.connections_reaped(reaped);
            debug!(
                reaped = reaped,
                live = registry.len(),
                "Swept dead-peer connections"
            );
        }
    }
}
