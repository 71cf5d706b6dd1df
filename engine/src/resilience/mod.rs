//! Failure isolation, retry and abort decisions

pub mod breaker;
pub mod estimator;
pub mod ledger;
pub mod retry;
