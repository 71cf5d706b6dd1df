//! Retry delay selection per operation class

use std::fmt;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::storage::settings::RetrySettings;

/// Kind of operation being retried, selects the backoff curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationClass {
    /// Identity broker readiness: progressive
    Keycloak,

    /// Calls to a remote federation partner: fixed plus jitter
    Federation,

    /// Secret store access: exponential
    Secret,

    /// Container health polling: linear
    Health,

    /// Anything else: exponential
    Default,
}

impl OperationClass {
    /// Classify a bare operation name such as `keycloak_health`
    ///
    /// Earlier keywords win, so `keycloak_health` is `Keycloak`. Names that
    /// match nothing fall back to `Default`.
    pub fn from_operation_name(name: &str) -> Self {
        let name = name.to_lowercase();
        if name.contains("keycloak") {
            OperationClass::Keycloak
        } else if name.contains("federation") {
            OperationClass::Federation
        } else if name.contains("secret") {
            OperationClass::Secret
        } else if name.contains("health") {
            OperationClass::Health
        } else {
            OperationClass::Default
        }
    }
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationClass::Keycloak => "keycloak",
            OperationClass::Federation => "federation",
            OperationClass::Secret => "secret",
            OperationClass::Health => "health",
            OperationClass::Default => "default",
        };
        f.write_str(s)
    }
}

fn exponential(attempt: u32, base: u64) -> u64 {
    let exp = attempt.saturating_sub(1).min(63);
    base.saturating_mul(1u64 << exp)
}

/// Delay in seconds before retry number `attempt` (1-based)
pub fn delay(class: OperationClass, attempt: u32, base_delay_secs: u64) -> u64 {
    delay_with_rng(class, attempt, base_delay_secs, &mut rand::thread_rng())
}

/// Same as [`delay`] with a caller-provided jitter source
pub fn delay_with_rng<R: Rng + ?Sized>(
    class: OperationClass,
    attempt: u32,
    base_delay_secs: u64,
    rng: &mut R,
) -> u64 {
    let attempt_u64 = u64::from(attempt);
    match class {
        OperationClass::Keycloak => base_delay_secs
            .saturating_mul(attempt_u64)
            .saturating_add(attempt_u64.saturating_mul(attempt_u64).saturating_mul(2)),
        OperationClass::Federation => {
            base_delay_secs.saturating_add(rng.gen_range(0..=base_delay_secs))
        }
        OperationClass::Health => base_delay_secs.saturating_mul(attempt_u64),
        OperationClass::Secret | OperationClass::Default => exponential(attempt, base_delay_secs),
    }
}

/// Attempt budget and delay clamp for a deployment run
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_delay: settings.base_delay(),
            max_delay: settings.max_delay(),
        }
    }
}

impl RetryPolicy {
    /// Wait before the next attempt, or `None` once `attempt` used the budget
    pub fn next_delay(&self, class: OperationClass, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let secs = delay(class, attempt, self.base_delay.as_secs());
        Some(Duration::from_secs(secs).min(self.max_delay))
    }
}
