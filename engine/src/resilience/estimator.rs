//! Advisory failure-probability score

use std::time::Duration;

use crate::resilience::ledger::ErrorCounts;

const CRITICAL_WEIGHT: u64 = 35;
const HIGH_WEIGHT: u64 = 10;
const MEDIUM_WEIGHT: u64 = 3;
const LOW_WEIGHT: u64 = 1;
const OPEN_BREAKER_WEIGHT: u64 = 8;

/// Minutes of runtime after which elapsed time stops adding risk
const ELAPSED_CAP_MINUTES: u64 = 30;

/// Estimate the chance (0-100) that a deployment fails
///
/// Monotone in every input. Does not feed the abort decision.
pub fn estimate(counts: &ErrorCounts, elapsed: Duration, open_breakers: usize) -> u8 {
    let errors = counts
        .critical
        .saturating_mul(CRITICAL_WEIGHT)
        .saturating_add(counts.high.saturating_mul(HIGH_WEIGHT))
        .saturating_add(counts.medium.saturating_mul(MEDIUM_WEIGHT))
        .saturating_add(counts.low.saturating_mul(LOW_WEIGHT));

    let minutes = (elapsed.as_secs() / 60).min(ELAPSED_CAP_MINUTES);
    let time = minutes / 2;

    let breakers = (open_breakers as u64).saturating_mul(OPEN_BREAKER_WEIGHT);

    errors
        .saturating_add(time)
        .saturating_add(breakers)
        .min(100) as u8
}
