//! Circuit breaker tests

mod common;

use std::time::Duration;

use hubspoke_engine::resilience::breaker::{
    CircuitBreakerRegistry, CircuitState, FAILURE_THRESHOLD, OPEN_TIMEOUT_SECS,
};

use hubspoke_engine::utils::Clock;

use common::ManualClock;

fn registry() -> (CircuitBreakerRegistry, std::sync::Arc<ManualClock>) {
    let clock = ManualClock::new();
    (CircuitBreakerRegistry::with_clock(clock.clone()), clock)
}

fn state(registry: &CircuitBreakerRegistry, name: &str) -> CircuitState {
    registry.snapshot(name).unwrap().state
}

fn open(registry: &CircuitBreakerRegistry, name: &str) {
    for _ in 0..FAILURE_THRESHOLD {
        registry.record_failure(name);
    }
}

fn half_open(registry: &CircuitBreakerRegistry, clock: &ManualClock, name: &str) {
    open(registry, name);
    clock.advance(Duration::from_secs(OPEN_TIMEOUT_SECS as u64 + 1));
    assert!(!registry.is_open(name));
    assert_eq!(state(registry, name), CircuitState::HalfOpen);
}

#[test]
fn test_init_closed() {
    let (registry, _) = registry();
    registry.init("op");
    let breaker = registry.snapshot("op").unwrap();
    assert_eq!(breaker.state, CircuitState::Closed);
    assert_eq!(breaker.failure_count, 0);
    assert!(breaker.last_failure_time.is_none());
}

#[test]
fn test_three_failures_open() {
    let (registry, clock) = registry();
    registry.init("op");

    registry.record_failure("op");
    registry.record_failure("op");
    assert_eq!(state(&registry, "op"), CircuitState::Closed);
    assert!(!registry.is_open("op"));

    registry.record_failure("op");
    let breaker = registry.snapshot("op").unwrap();
    assert_eq!(breaker.state, CircuitState::Open);
    assert_eq!(breaker.last_failure_time, Some(clock.now()));
    assert!(registry.is_open("op"));
}

#[test]
fn test_success_resets_failures() {
    let (registry, _) = registry();
    registry.record_failure("op");
    registry.record_failure("op");
    registry.record_success("op");

    let breaker = registry.snapshot("op").unwrap();
    assert_eq!(breaker.state, CircuitState::Closed);
    assert_eq!(breaker.failure_count, 0);

    // Needs three fresh failures again
    registry.record_failure("op");
    registry.record_failure("op");
    assert_eq!(state(&registry, "op"), CircuitState::Closed);
}

#[test]
fn test_open_until_timeout() {
    let (registry, clock) = registry();
    open(&registry, "keycloak_health");

    clock.advance(Duration::from_secs(OPEN_TIMEOUT_SECS as u64));
    assert!(registry.is_open("keycloak_health"));
    assert_eq!(state(&registry, "keycloak_health"), CircuitState::Open);

    clock.advance(Duration::from_secs(1));
    assert!(!registry.is_open("keycloak_health"));
    assert_eq!(state(&registry, "keycloak_health"), CircuitState::HalfOpen);
}

#[test]
fn test_half_open_failure_reopens() {
    let (registry, clock) = registry();
    half_open(&registry, &clock, "op");

    registry.record_success("op");
    registry.record_failure("op");
    let breaker = registry.snapshot("op").unwrap();
    assert_eq!(breaker.state, CircuitState::Open);
    assert_eq!(breaker.half_open_success_count, 0);
    assert!(registry.is_open("op"));
}

#[test]
fn test_half_open_two_successes_close() {
    let (registry, clock) = registry();
    half_open(&registry, &clock, "op");

    registry.record_success("op");
    assert_eq!(state(&registry, "op"), CircuitState::HalfOpen);
    registry.record_success("op");

    let breaker = registry.snapshot("op").unwrap();
    assert_eq!(breaker.state, CircuitState::Closed);
    assert_eq!(breaker.failure_count, 0);
    assert_eq!(breaker.half_open_success_count, 0);
}

#[test]
fn test_count_open() {
    let (registry, clock) = registry();
    registry.init("federation_config");
    open(&registry, "secret_fetch");
    open(&registry, "keycloak_health");
    assert_eq!(registry.count_open(), 2);

    clock.advance(Duration::from_secs(OPEN_TIMEOUT_SECS as u64 + 1));
    assert!(!registry.is_open("secret_fetch"));
    assert_eq!(registry.count_open(), 1);
}

#[test]
fn test_breakers_are_independent() {
    let (registry, _) = registry();
    open(&registry, "secret_fetch");
    assert!(registry.is_open("secret_fetch"));
    assert!(!registry.is_open("federation_config"));
}
