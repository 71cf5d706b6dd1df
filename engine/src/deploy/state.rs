//! Persisted, resumable deployment state per instance

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::deploy::fsm::{validate_transition, DeploymentRecord, Phase};
use crate::errors::EngineError;
use crate::filesys::file::File;
use crate::storage::layout::StorageLayout;
use crate::utils::{Clock, SystemClock};

/// Deployment state machine backed by one JSON record per instance
///
/// Writes for an instance are serialized on that instance's lock. Reads go
/// straight to disk and verify the record; records are replaced by rename so
/// a reader never sees a half-written file.
pub struct StateMachine {
    layout: StorageLayout,
    clock: Arc<dyn Clock>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl StateMachine {
    pub fn new(layout: StorageLayout) -> Self {
        Self::with_clock(layout, Arc::new(SystemClock))
    }

    pub fn with_clock(layout: StorageLayout, clock: Arc<dyn Clock>) -> Self {
        Self {
            layout,
            clock,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, instance: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(instance.to_lowercase())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn state_file(&self, instance: &str) -> File {
        self.layout.state_file(instance)
    }

    /// Read and verify the record of an instance
    ///
    /// A record that fails its checksum or carries a foreign version is
    /// `CorruptState`; it is never handed to a writer to be resealed.
    async fn load(&self, instance: &str) -> Result<Option<DeploymentRecord>, EngineError> {
        let file = self.state_file(instance);
        let record = match file.read_json_opt::<DeploymentRecord>().await {
            Ok(record) => record,
            Err(EngineError::JsonError(e)) => {
                return Err(EngineError::CorruptState(format!(
                    "{}: unreadable state record: {}",
                    instance, e
                )))
            }
            Err(e) => return Err(e),
        };

        if let Some(record) = &record {
            Self::check(instance, record)?;
        }
        Ok(record)
    }

    fn check(instance: &str, record: &DeploymentRecord) -> Result<(), EngineError> {
        if record.is_stale() {
            return Err(EngineError::CorruptState(format!(
                "{}: unsupported state version {}",
                instance,
                record.version.as_deref().unwrap_or("")
            )));
        }

        if !record.verify() {
            warn!("Checksum mismatch in state record of {}", instance);
            return Err(EngineError::CorruptState(format!(
                "{}: checksum mismatch",
                instance
            )));
        }

        Ok(())
    }

    async fn store(&self, instance: &str, record: &mut DeploymentRecord) -> Result<(), EngineError> {
        record.seal(self.clock.now());
        self.state_file(instance).write_json(record).await
    }

    /// Current phase, `Unknown` when no record exists
    pub async fn get_state(&self, instance: &str) -> Result<Phase, EngineError> {
        Ok(self
            .load(instance)
            .await?
            .map(|r| r.phase)
            .unwrap_or(Phase::Unknown))
    }

    /// Move an instance to a new phase
    pub async fn set_state(&self, instance: &str, to: Phase) -> Result<(), EngineError> {
        let lock = self.lock_for(instance);
        let _guard = lock.lock().await;

        let mut record = self
            .load(instance)
            .await?
            .unwrap_or_else(|| DeploymentRecord::new(self.clock.now()));
        let from = record.phase;

        if !validate_transition(from, to) {
            warn!("Rejected transition for {}: {} -> {}", instance, from, to);
            return Err(EngineError::InvalidTransition { from, to });
        }

        record.phase = to;
        self.store(instance, &mut record).await?;
        info!("Instance {} transitioned: {} -> {}", instance, from, to);
        Ok(())
    }

    /// Record a finished step so a resumed deployment can skip it
    pub async fn mark_step_complete(&self, instance: &str, step_id: &str) -> Result<(), EngineError> {
        let lock = self.lock_for(instance);
        let _guard = lock.lock().await;

        let mut record = self
            .load(instance)
            .await?
            .unwrap_or_else(|| DeploymentRecord::new(self.clock.now()));

        if record.completed_steps.insert(step_id.to_string()) {
            self.store(instance, &mut record).await?;
            debug!("Instance {} completed step {}", instance, step_id);
        }
        Ok(())
    }

    /// Whether the step already completed in an earlier run
    pub async fn should_skip_step(&self, instance: &str, step_id: &str) -> Result<bool, EngineError> {
        let skip = self
            .load(instance)
            .await?
            .map(|r| r.completed_steps.contains(step_id))
            .unwrap_or(false);
        if skip {
            debug!("Skipping completed step {} for {}", step_id, instance);
        }
        Ok(skip)
    }

    /// Verify the stored checksum and schema version
    ///
    /// A missing record is trivially intact. On failure the instance cannot be
    /// resumed and has to be restarted clean.
    pub async fn validate_integrity(&self, instance: &str) -> Result<(), EngineError> {
        self.load(instance).await.map(|_| ())
    }

    /// Full record for inspection
    pub async fn snapshot(&self, instance: &str) -> Result<Option<DeploymentRecord>, EngineError> {
        self.load(instance).await
    }

    /// Remove the record of an instance (explicit teardown)
    ///
    /// The only way out of `CorruptState`.
    pub async fn clear_state(&self, instance: &str) -> Result<(), EngineError> {
        let lock = self.lock_for(instance);
        let _guard = lock.lock().await;

        self.state_file(instance).delete().await?;
        info!("Cleared deployment state of {}", instance);
        Ok(())
    }
}
