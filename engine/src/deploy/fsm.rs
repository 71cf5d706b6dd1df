//! Finite State Machine for instance deployment

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::sha256_hash;

/// Current schema version of persisted deployment records
pub const STATE_VERSION: &str = "2.0";

/// Deployment phase of one instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// No record exists yet
    Unknown,

    /// Preparing certificates, secrets and networks
    Initializing,

    /// Containers are being brought up
    Deploying,

    /// Identity broker and federation are being configured
    Configuring,

    /// Post-deployment verification
    Verifying,

    /// Deployment finished successfully
    Complete,

    /// Deployment failed
    Failed,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::Unknown,
        Phase::Initializing,
        Phase::Deploying,
        Phase::Configuring,
        Phase::Verifying,
        Phase::Complete,
        Phase::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Unknown => "unknown",
            Phase::Initializing => "initializing",
            Phase::Deploying => "deploying",
            Phase::Configuring => "configuring",
            Phase::Verifying => "verifying",
            Phase::Complete => "complete",
            Phase::Failed => "failed",
        }
    }

    /// Whether the phase ends a deployment
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Complete | Phase::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check a phase change against the transition table
///
/// Any phase may move to `Failed`; otherwise only the single forward step
/// is allowed.
pub fn validate_transition(from: Phase, to: Phase) -> bool {
    if to == Phase::Failed {
        return true;
    }

    matches!(
        (from, to),
        (Phase::Unknown, Phase::Initializing)
            | (Phase::Initializing, Phase::Deploying)
            | (Phase::Deploying, Phase::Configuring)
            | (Phase::Configuring, Phase::Verifying)
            | (Phase::Verifying, Phase::Complete)
    )
}

/// Persisted deployment record of one instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Schema version, absent on records written before versioning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    pub phase: Phase,

    #[serde(default)]
    pub completed_steps: BTreeSet<String>,

    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub checksum: String,
}

impl DeploymentRecord {
    /// Create an empty record in the `Unknown` phase
    pub fn new(now: DateTime<Utc>) -> Self {
        let mut record = Self {
            version: Some(STATE_VERSION.to_string()),
            phase: Phase::Unknown,
            completed_steps: BTreeSet::new(),
            updated_at: now,
            checksum: String::new(),
        };
        record.checksum = record.compute_checksum();
        record
    }

    /// Hash over every field except the checksum itself
    pub fn compute_checksum(&self) -> String {
        let mut canonical = String::new();
        canonical.push_str(self.version.as_deref().unwrap_or(""));
        canonical.push('\n');
        canonical.push_str(self.phase.as_str());
        canonical.push('\n');
        for step in &self.completed_steps {
            // Length prefix keeps step ids containing separators unambiguous
            canonical.push_str(&format!("{}:{}\n", step.len(), step));
        }
        canonical.push_str(&self.updated_at.to_rfc3339_opts(SecondsFormat::Nanos, true));
        sha256_hash(canonical.as_bytes())
    }

    /// Stamp version and time, then recompute the checksum
    pub fn seal(&mut self, now: DateTime<Utc>) {
        if self.version.is_none() {
            self.version = Some(STATE_VERSION.to_string());
        }
        self.updated_at = now;
        self.checksum = self.compute_checksum();
    }

    /// Whether the stored checksum matches the record
    pub fn verify(&self) -> bool {
        self.checksum == self.compute_checksum()
    }

    /// Whether the record carries a version this build cannot read
    pub fn is_stale(&self) -> bool {
        matches!(&self.version, Some(v) if v != STATE_VERSION)
    }
}
