//! Idle session reaper

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;

use super::registry::SessionRegistry;

pub struct IdleReaper {
    registry: Arc<SessionRegistry>,
    keep_alive: Duration,
    interval: Duration,
    shutdown: AtomicBool,
}

impl IdleReaper {
    /// Sweeps every half keep-alive window, as configured on the registry.
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        let config = registry.config();
        let keep_alive = config.keep_alive;
        let interval = config.reap_interval();
        Self {
            registry,
            keep_alive,
            interval,
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.interval);
        // The first tick completes immediately
        interval.tick().await;

        while !self.shutdown.load(Ordering::Relaxed) {
            interval.tick().await;
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
            self.sweep().await;
        }
        tracing::debug!("Idle reaper stopped");
    }

    /// One pass over the keep-alive map.
    pub async fn sweep(&self) -> usize {
        let evicted = self.registry.evict_idle(self.keep_alive).await;
        if evicted > 0 {
            tracing::debug!("Reaped {} idle sessions", evicted);
        }
        evicted
    }
}
