//! Deployment run: the engine surface a deployment driver talks to

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::app::options::{RunOptions, SleepFn};
use crate::deploy::checkpoint::{Checkpoint, CheckpointLevel, CheckpointRefs, CheckpointStore};
use crate::deploy::deps::DependencyResolver;
use crate::deploy::fsm::{DeploymentRecord, Phase};
use crate::deploy::state::StateMachine;
use crate::errors::EngineError;
use crate::resilience::breaker::CircuitBreakerRegistry;
use crate::resilience::estimator;
use crate::resilience::ledger::{ErrorCounts, ErrorLedger, Severity};
use crate::resilience::retry::{self, OperationClass, RetryPolicy};
use crate::utils::Clock;

/// Brings up a single service; implemented by the container driver
#[async_trait]
pub trait ServiceRunner: Send + Sync {
    async fn start(&self, instance: &str, service: &str, attempt: u32) -> anyhow::Result<()>;
}

/// Result of [`DeploymentRun::run_step`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Already completed by an earlier run
    Skipped,

    /// Completed now
    Completed { attempts: u32 },
}

/// One deployment run of one instance
///
/// Owns the transient run state (circuit breakers and error ledger) and
/// shares the durable stores and the dependency graph with other runs.
pub struct DeploymentRun {
    instance: String,
    resolver: Arc<DependencyResolver>,
    states: Arc<StateMachine>,
    checkpoints: Arc<CheckpointStore>,
    breakers: CircuitBreakerRegistry,
    ledger: ErrorLedger,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    sleep: SleepFn,
    started_at: DateTime<Utc>,
}

impl DeploymentRun {
    /// Start a run with its own stores
    ///
    /// Fails if the built-in dependency graph is invalid.
    pub fn new(instance: &str, options: RunOptions) -> Result<Self, EngineError> {
        let resolver = Arc::new(DependencyResolver::new()?);
        let states = Arc::new(StateMachine::with_clock(
            options.layout.clone(),
            options.clock.clone(),
        ));
        let checkpoints = Arc::new(CheckpointStore::with_clock(
            options.layout.clone(),
            options.clock.clone(),
        ));
        Ok(Self::with_shared(instance, options, resolver, states, checkpoints))
    }

    /// Start a run sharing stores with concurrent runs of other instances
    pub fn with_shared(
        instance: &str,
        options: RunOptions,
        resolver: Arc<DependencyResolver>,
        states: Arc<StateMachine>,
        checkpoints: Arc<CheckpointStore>,
    ) -> Self {
        let started_at = options.clock.now();
        info!("Starting deployment run for {}", instance);
        Self {
            instance: instance.to_string(),
            resolver,
            states,
            checkpoints,
            breakers: CircuitBreakerRegistry::with_clock(options.clock.clone()),
            ledger: ErrorLedger::new(),
            retry: options.retry,
            clock: options.clock,
            sleep: options.sleep,
            started_at,
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn ledger(&self) -> &ErrorLedger {
        &self.ledger
    }

    // ================================ ORDERING ================================== //

    pub fn resolve(&self, service: &str) -> Result<Vec<String>, EngineError> {
        self.resolver.resolve(service)
    }

    // ================================= STATE ==================================== //

    pub async fn get_state(&self) -> Result<Phase, EngineError> {
        self.states.get_state(&self.instance).await
    }

    pub async fn set_state(&self, phase: Phase) -> Result<(), EngineError> {
        self.states.set_state(&self.instance, phase).await
    }

    pub async fn should_skip_step(&self, step_id: &str) -> Result<bool, EngineError> {
        self.states.should_skip_step(&self.instance, step_id).await
    }

    pub async fn mark_step_complete(&self, step_id: &str) -> Result<(), EngineError> {
        self.states.mark_step_complete(&self.instance, step_id).await
    }

    pub async fn validate_integrity(&self) -> Result<(), EngineError> {
        self.states.validate_integrity(&self.instance).await
    }

    pub async fn state_snapshot(&self) -> Result<Option<DeploymentRecord>, EngineError> {
        self.states.snapshot(&self.instance).await
    }

    // ============================ FAILURE HANDLING ============================== //

    /// Seconds to wait before retry `attempt` of an operation class
    pub fn delay(&self, class: OperationClass, attempt: u32) -> u64 {
        retry::delay(class, attempt, self.retry.base_delay.as_secs())
    }

    pub fn record_error(&self, code: &str, severity: Severity, message: &str, component: &str) {
        self.ledger.record_error(code, severity, message, component);
    }

    pub fn should_continue(&self) -> bool {
        self.ledger.should_continue()
    }

    pub fn error_counts(&self) -> ErrorCounts {
        self.ledger.counts()
    }

    /// Time since the run started
    pub fn elapsed(&self) -> Duration {
        (self.clock.now() - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Advisory 0-100 risk score for this run
    pub fn estimate(&self) -> u8 {
        estimator::estimate(
            &self.ledger.counts(),
            self.elapsed(),
            self.breakers.count_open(),
        )
    }

    // =============================== CHECKPOINTS ================================ //

    /// Snapshot progress, recording the current phase and the services up
    pub async fn create_checkpoint(
        &self,
        level: CheckpointLevel,
        description: &str,
        services: &[String],
    ) -> Result<String, EngineError> {
        let refs = CheckpointRefs {
            phase: Some(self.get_state().await?),
            services: services.to_vec(),
        };
        self.checkpoints
            .create_checkpoint_with_refs(&self.instance, level, description, refs)
            .await
    }

    pub async fn find_latest(&self) -> Result<String, EngineError> {
        self.checkpoints.find_latest(&self.instance).await
    }

    /// Checkpoint to restore after an abort
    pub async fn rollback_target(&self) -> Result<Checkpoint, EngineError> {
        let id = self.find_latest().await?;
        let checkpoint = self.checkpoints.load(&self.instance, &id).await?;
        info!(
            "Rollback target for {}: {} ({})",
            self.instance, checkpoint.id, checkpoint.level
        );
        Ok(checkpoint)
    }

    // ================================= STEPS ==================================== //

    /// Run one resumable, breaker-guarded, retried step
    ///
    /// `operation` names the circuit breaker; `class` picks the backoff.
    /// `action` receives the 1-based attempt number; its errors are opaque
    /// to the engine.
    pub async fn run_step<F, Fut>(
        &self,
        step_id: &str,
        operation: &str,
        class: OperationClass,
        action: F,
    ) -> Result<StepOutcome, EngineError>
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        if self.should_skip_step(step_id).await? {
            return Ok(StepOutcome::Skipped);
        }

        if !self.should_continue() {
            return Err(EngineError::Aborted(format!(
                "{} not started, error budget exhausted",
                step_id
            )));
        }

        self.breakers.init(operation);
        let mut attempt = 1;
        loop {
            if self.breakers.is_open(operation) {
                return Err(self.refuse(step_id, operation));
            }

            debug!("Running step {} attempt {}", step_id, attempt);
            let err = match action(attempt).await {
                Ok(()) => {
                    self.breakers.record_success(operation);
                    self.mark_step_complete(step_id).await?;
                    return Ok(StepOutcome::Completed { attempts: attempt });
                }
                Err(err) => err,
            };

            self.breakers.record_failure(operation);
            self.record_error(
                "STEP_FAILED",
                Severity::Medium,
                &format!("{} attempt {} failed: {:#}", step_id, attempt, err),
                operation,
            );

            // No backoff when this failure tripped the breaker
            if self.breakers.is_open(operation) {
                return Err(self.refuse(step_id, operation));
            }

            let Some(wait) = self.retry.next_delay(class, attempt) else {
                self.record_error(
                    "RETRIES_EXHAUSTED",
                    Severity::High,
                    &format!("{} gave up after {} attempts", step_id, attempt),
                    operation,
                );
                return Err(EngineError::StepFailed {
                    step: step_id.to_string(),
                    reason: format!("{:#}", err),
                });
            };

            if !self.should_continue() {
                return Err(EngineError::Aborted(format!(
                    "{} stopped after attempt {}",
                    step_id, attempt
                )));
            }

            warn!("Retrying {} in {:?} ({} backoff)", step_id, wait, class);
            (self.sleep)(wait).await;
            attempt += 1;
        }
    }

    fn refuse(&self, step_id: &str, operation: &str) -> EngineError {
        self.record_error(
            "CIRCUIT_OPEN",
            Severity::High,
            &format!("{} refused, circuit {} is open", step_id, operation),
            operation,
        );
        EngineError::CircuitOpen(operation.to_string())
    }

    /// Bring up a service and everything it depends on
    ///
    /// Services in the same dependency layer start concurrently. Returns the
    /// services in the order their layers finished.
    pub async fn deploy_service<R: ServiceRunner>(
        &self,
        service: &str,
        runner: &R,
    ) -> Result<Vec<String>, EngineError> {
        let layers = self.resolver.resolve_layers(service)?;
        let mut started = Vec::new();

        for layer in layers {
            let results =
                futures::future::join_all(layer.iter().map(|svc| self.start_service(svc, runner)))
                    .await;

            for (svc, result) in layer.into_iter().zip(results) {
                if let Err(e) = result {
                    error!("Service {} failed to start on {}: {}", svc, self.instance, e);
                    return Err(e);
                }
                started.push(svc);
            }
        }

        Ok(started)
    }

    async fn start_service<R: ServiceRunner>(
        &self,
        service: &str,
        runner: &R,
    ) -> Result<StepOutcome, EngineError> {
        let step_id = format!("deploy:{}", service);
        let operation = format!("{}_start", service);
        let class = OperationClass::from_operation_name(service);
        let instance = self.instance.as_str();

        self.run_step(&step_id, &operation, class, |attempt| {
            runner.start(instance, service, attempt)
        })
        .await
    }
}
