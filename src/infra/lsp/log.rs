//! Bounded log of server-reported messages

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;

use super::protocol::MessageType;

#[derive(Debug, Clone, Serialize)]
pub struct LogLine {
    pub at: DateTime<Local>,
    pub level: MessageType,
    pub message: String,
}

/// Per-connection message log. Disabled until switched on.
#[derive(Debug)]
pub struct ServerLog {
    enabled: AtomicBool,
    capacity: usize,
    lines: Mutex<VecDeque<LogLine>>,
}

impl ServerLog {
    pub const DEFAULT_CAPACITY: usize = 5000;

    pub fn new(enabled: bool) -> Self {
        Self::with_capacity(enabled, Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(enabled: bool, capacity: usize) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            capacity: capacity.max(1),
            lines: Mutex::new(VecDeque::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Append a line. A repeat of the previous line is dropped.
    pub fn record(&self, level: MessageType, message: &str) {
        if !self.is_enabled() {
            return;
        }

        let mut lines = self.lines.lock();
        if let Some(last) = lines.back()
            && last.level == level
            && last.message == message
        {
            return;
        }

        if lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(LogLine {
            at: Local::now(),
            level,
            message: message.to_string(),
        });
    }

    pub fn lines(&self) -> Vec<LogLine> {
        self.lines.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

impl Default for ServerLog {
    fn default() -> Self {
        Self::new(false)
    }
}
