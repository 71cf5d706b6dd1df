//! Error severity ledger and the continue/abort decision

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// High-severity errors that abort a deployment without any critical one
pub const HIGH_ABORT_THRESHOLD: u64 = 4;

/// Recorded errors kept for diagnostics
const HISTORY_CAPACITY: usize = 100;

/// Error severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Per-severity error counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCounts {
    pub critical: u64,
    pub high: u64,
    pub medium: u64,
    pub low: u64,
}

impl ErrorCounts {
    /// Whether a deployment with these counts may keep going
    pub fn should_continue(&self) -> bool {
        self.critical == 0 && self.high < HIGH_ABORT_THRESHOLD
    }

    pub fn total(&self) -> u64 {
        self.critical + self.high + self.medium + self.low
    }
}

/// One recorded error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub code: String,
    pub severity: Severity,
    pub message: String,
    pub component: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct LedgerInner {
    counts: ErrorCounts,
    history: VecDeque<ErrorEntry>,
}

/// Error counters of one deployment run
#[derive(Debug, Default)]
pub struct ErrorLedger {
    inner: Mutex<LedgerInner>,
}

impl ErrorLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an error under its severity
    pub fn record_error(&self, code: &str, severity: Severity, message: &str, component: &str) {
        match severity {
            Severity::Critical => error!(code, component, "Critical error: {}", message),
            Severity::High => warn!(code, component, "High severity error: {}", message),
            Severity::Medium => warn!(code, component, "Error: {}", message),
            Severity::Low => info!(code, component, "Minor error: {}", message),
        }

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match severity {
            Severity::Critical => inner.counts.critical += 1,
            Severity::High => inner.counts.high += 1,
            Severity::Medium => inner.counts.medium += 1,
            Severity::Low => inner.counts.low += 1,
        }

        if inner.history.len() == HISTORY_CAPACITY {
            inner.history.pop_front();
        }
        inner.history.push_back(ErrorEntry {
            code: code.to_string(),
            severity,
            message: message.to_string(),
            component: component.to_string(),
            recorded_at: Utc::now(),
        });
    }

    /// False once any critical error or four high-severity errors were seen
    pub fn should_continue(&self) -> bool {
        self.counts().should_continue()
    }

    pub fn counts(&self) -> ErrorCounts {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).counts
    }

    /// Most recent errors, oldest first
    pub fn recent(&self) -> Vec<ErrorEntry> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.history.iter().cloned().collect()
    }
}
