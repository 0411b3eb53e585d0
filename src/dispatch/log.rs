//! Capped command log
//!
//! Append-only pane of runner output. Only the most recent `LOG_CAP`
//! entries are kept; older ones fall off the front.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Retained entry count
pub const LOG_CAP: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

pub struct CommandLog {
    lines: Mutex<VecDeque<LogLine>>,
}

impl CommandLog {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(VecDeque::with_capacity(LOG_CAP)),
        }
    }

    pub fn append(&self, text: String) {
        let mut lines = self.lines.lock();
        if lines.len() == LOG_CAP {
            lines.pop_front();
        }
        lines.push_back(LogLine {
            timestamp: Utc::now(),
            text,
        });
    }

    /// Snapshot of the retained entries, oldest first.
    pub fn entries(&self) -> Vec<LogLine> {
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

impl Default for CommandLog {
    fn default() -> Self {
        Self::new()
    }
}
