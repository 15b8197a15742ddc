//! Message sink — transient notices and the append-only activity log.
//!
//! No state of its own beyond the buffers: the embedding UI drains notices
//! and fresh log lines after each controller turn and renders them however
//! it likes.

use std::collections::VecDeque;

use chrono::{DateTime, Local};
use tracing::{error, info, warn};

const MAX_LOG_LINES: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// One line in the activity log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub at: DateTime<Local>,
    pub severity: Severity,
    pub message: String,
}

/// A transient notification for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub severity: Severity,
    pub title: String,
    pub body: String,
}

pub struct MessageSink {
    log: VecDeque<LogEntry>,
    fresh: Vec<LogEntry>,
    notices: VecDeque<Notice>,
}

impl MessageSink {
    pub fn new() -> Self {
        Self {
            log: VecDeque::new(),
            fresh: Vec::new(),
            notices: VecDeque::new(),
        }
    }

    pub fn log(&mut self, severity: Severity, message: impl Into<String>) {
        let message = message.into();
        match severity {
            Severity::Error => error!(target: "activity", "{}", message),
            Severity::Warning => warn!(target: "activity", "{}", message),
            _ => info!(target: "activity", "{}", message),
        }
        let entry = LogEntry {
            at: Local::now(),
            severity,
            message,
        };
        self.fresh.push(entry.clone());
        self.log.push_back(entry);
        while self.log.len() > MAX_LOG_LINES {
            self.log.pop_front();
        }
    }

    pub fn notify(
        &mut self,
        severity: Severity,
        title: impl Into<String>,
        body: impl Into<String>,
    ) {
        self.notices.push_back(Notice {
            severity,
            title: title.into(),
            body: body.into(),
        });
    }

    /// Log lines appended since the last drain.
    pub fn drain_new_entries(&mut self) -> Vec<LogEntry> {
        std::mem::take(&mut self.fresh)
    }

    pub fn drain_notices(&mut self) -> Vec<Notice> {
        self.notices.drain(..).collect()
    }

    /// The full scrollback, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.log.iter()
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
        self.fresh.clear();
    }
}

impl Default for MessageSink {
    fn default() -> Self {
        Self::new()
    }
}
