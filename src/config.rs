//! Resolved runtime configuration
//!
//! `BinderConfig` is the on-disk shape; `RuntimeConfig` is the
//! `Duration`-typed view handed to the registry, reaper and scheduler.

use std::time::Duration;

use crate::models::config::BinderConfig;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub keep_alive: Duration,
    pub handshake_poll: Duration,
    pub handshake_timeout: Option<Duration>,
    pub request_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub exit_wait: Duration,
    pub debounce: Duration,
    pub communication_log: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from(&BinderConfig::default())
    }
}

impl From<&BinderConfig> for RuntimeConfig {
    fn from(config: &BinderConfig) -> Self {
        let session = &config.session;
        Self {
            keep_alive: Duration::from_secs(session.keep_alive_mins * 60),
            handshake_poll: Duration::from_millis(session.handshake_poll_ms.max(1)),
            handshake_timeout: (session.handshake_timeout_secs > 0)
                .then(|| Duration::from_secs(session.handshake_timeout_secs)),
            request_timeout: Duration::from_millis(session.request_timeout_ms),
            shutdown_timeout: Duration::from_secs(session.shutdown_timeout_secs),
            exit_wait: Duration::from_secs(session.exit_wait_secs),
            debounce: Duration::from_millis(config.tasks.debounce_ms),
            communication_log: session.communication_log,
        }
    }
}

impl RuntimeConfig {
    /// Reaper period: half the keep-alive window, never below one second.
    pub fn reap_interval(&self) -> Duration {
        (self.keep_alive / 2).max(Duration::from_secs(1))
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_handshake_poll(mut self, poll: Duration) -> Self {
        self.handshake_poll = poll;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeouts(mut self, shutdown: Duration, exit_wait: Duration) -> Self {
        self.shutdown_timeout = shutdown;
        self.exit_wait = exit_wait;
        self
    }
}
