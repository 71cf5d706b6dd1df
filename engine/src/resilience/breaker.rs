//! Circuit breakers guarding risky deployment operations
//!
//! ```text
//! Closed    -> Open:      3 consecutive failures
//! Open      -> Half-Open: 60s after the last failure, observed via is_open()
//! Half-Open -> Closed:    2 consecutive successes
//! Half-Open -> Open:      any failure
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::utils::{Clock, SystemClock};

/// Consecutive failures that open a closed breaker
pub const FAILURE_THRESHOLD: u32 = 3;

/// Seconds an open breaker waits before allowing a probe
pub const OPEN_TIMEOUT_SECS: i64 = 60;

/// Consecutive probe successes that close a half-open breaker
pub const HALF_OPEN_SUCCESS_THRESHOLD: u32 = 2;

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(s)
    }
}

/// State of one breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreaker {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub half_open_success_count: u32,
}

impl CircuitBreaker {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            half_open_success_count: 0,
        }
    }

    fn trip(&mut self, now: DateTime<Utc>) {
        self.state = CircuitState::Open;
        self.last_failure_time = Some(now);
        self.half_open_success_count = 0;
    }
}

/// Breakers keyed by operation name
///
/// Breakers are created lazily on first reference and live for one
/// deployment run.
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<Mutex<CircuitBreaker>>>>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            clock,
        }
    }

    fn breaker(&self, name: &str) -> Arc<Mutex<CircuitBreaker>> {
        {
            let breakers = self.breakers.read().unwrap_or_else(|e| e.into_inner());
            if let Some(breaker) = breakers.get(name) {
                return breaker.clone();
            }
        }

        let mut breakers = self.breakers.write().unwrap_or_else(|e| e.into_inner());
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!("Initialized circuit breaker {}", name);
                Arc::new(Mutex::new(CircuitBreaker::new()))
            })
            .clone()
    }

    /// Create a closed breaker unless one exists
    pub fn init(&self, name: &str) {
        self.breaker(name);
    }

    /// Report a successful attempt
    pub fn record_success(&self, name: &str) {
        let breaker = self.breaker(name);
        let mut breaker = breaker.lock().unwrap_or_else(|e| e.into_inner());

        match breaker.state {
            CircuitState::Closed => breaker.failure_count = 0,
            CircuitState::HalfOpen => {
                breaker.half_open_success_count += 1;
                if breaker.half_open_success_count >= HALF_OPEN_SUCCESS_THRESHOLD {
                    breaker.state = CircuitState::Closed;
                    breaker.failure_count = 0;
                    breaker.half_open_success_count = 0;
                    info!("Circuit {} closed after successful probes", name);
                }
            }
            // Probes are not sent while open
            CircuitState::Open => {}
        }
    }

    /// Report a failed attempt
    pub fn record_failure(&self, name: &str) {
        let now = self.clock.now();
        let breaker = self.breaker(name);
        let mut breaker = breaker.lock().unwrap_or_else(|e| e.into_inner());

        match breaker.state {
            CircuitState::Closed => {
                breaker.failure_count += 1;
                if breaker.failure_count >= FAILURE_THRESHOLD {
                    breaker.trip(now);
                    warn!(
                        "Circuit {} opened after {} consecutive failures",
                        name, breaker.failure_count
                    );
                }
            }
            CircuitState::HalfOpen => {
                breaker.trip(now);
                warn!("Circuit {} reopened, probe failed", name);
            }
            // Callers skip the operation while open
            CircuitState::Open => {}
        }
    }

    /// Whether the guarded operation must be skipped
    ///
    /// Not idempotent: an open breaker whose timeout has elapsed moves to
    /// half-open here and reports closed, letting the caller send a probe.
    pub fn is_open(&self, name: &str) -> bool {
        let now = self.clock.now();
        let breaker = self.breaker(name);
        let mut breaker = breaker.lock().unwrap_or_else(|e| e.into_inner());

        if breaker.state != CircuitState::Open {
            return false;
        }

        let elapsed = breaker
            .last_failure_time
            .map(|at| now - at)
            .unwrap_or_else(Duration::zero);
        if elapsed > Duration::seconds(OPEN_TIMEOUT_SECS) {
            breaker.state = CircuitState::HalfOpen;
            breaker.half_open_success_count = 0;
            info!("Circuit {} half-open, allowing probe", name);
            return false;
        }

        true
    }

    /// Number of breakers currently open
    pub fn count_open(&self) -> usize {
        let breakers = self.breakers.read().unwrap_or_else(|e| e.into_inner());
        breakers
            .values()
            .filter(|b| b.lock().unwrap_or_else(|e| e.into_inner()).state == CircuitState::Open)
            .count()
    }

    /// Copy of a breaker's state, if it has been referenced
    pub fn snapshot(&self, name: &str) -> Option<CircuitBreaker> {
        let breakers = self.breakers.read().unwrap_or_else(|e| e.into_inner());
        breakers
            .get(name)
            .map(|b| b.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
