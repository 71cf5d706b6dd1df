//! Immutable deployment checkpoints used as rollback targets

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::deploy::fsm::Phase;
use crate::errors::EngineError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::storage::layout::StorageLayout;
use crate::utils::{Clock, SystemClock};

/// Attempts at allocating an unused id before giving up
const MAX_ID_ATTEMPTS: u64 = 16;

/// Granularity of a checkpoint, coarse to fine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointLevel {
    /// Containers are up
    Container,

    /// Services are configured
    Configuration,

    /// Federation with the hub is configured
    Federation,

    /// The whole deployment finished
    Complete,
}

impl fmt::Display for CheckpointLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckpointLevel::Container => "container",
            CheckpointLevel::Configuration => "configuration",
            CheckpointLevel::Federation => "federation",
            CheckpointLevel::Complete => "complete",
        };
        f.write_str(s)
    }
}

/// References to deployment state captured alongside a checkpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRefs {
    /// Instance phase when the checkpoint was taken
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,

    /// Services reported as up
    #[serde(default)]
    pub services: Vec<String>,
}

/// Checkpoint metadata record, written once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub instance_code: String,
    pub level: CheckpointLevel,
    pub description: String,
    pub created_at: DateTime<Utc>,

    /// Position among the instance's checkpoints, breaks timestamp ties
    pub sequence: u64,

    #[serde(flatten)]
    pub refs: CheckpointRefs,
}

/// Append-only checkpoint storage, one directory per instance
pub struct CheckpointStore {
    layout: StorageLayout,
    clock: Arc<dyn Clock>,
}

impl CheckpointStore {
    pub fn new(layout: StorageLayout) -> Self {
        Self::with_clock(layout, Arc::new(SystemClock))
    }

    pub fn with_clock(layout: StorageLayout, clock: Arc<dyn Clock>) -> Self {
        Self { layout, clock }
    }

    fn dir(&self, instance: &str) -> Dir {
        self.layout.checkpoints_dir(instance)
    }

    fn file(&self, instance: &str, id: &str) -> File {
        self.dir(instance).file(&format!("{}.json", id))
    }

    /// Create a checkpoint without state references
    pub async fn create_checkpoint(
        &self,
        instance: &str,
        level: CheckpointLevel,
        description: &str,
    ) -> Result<String, EngineError> {
        self.create_checkpoint_with_refs(instance, level, description, CheckpointRefs::default())
            .await
    }

    /// Create a checkpoint and return its id
    pub async fn create_checkpoint_with_refs(
        &self,
        instance: &str,
        level: CheckpointLevel,
        description: &str,
        refs: CheckpointRefs,
    ) -> Result<String, EngineError> {
        let created_at = self.clock.now();
        let existing = self.dir(instance).list_files_with_ext("json").await?.len() as u64;

        for offset in 0..MAX_ID_ATTEMPTS {
            let sequence = existing + offset;
            let id = format!("{}-{:06}", created_at.format("%Y%m%dT%H%M%S%.6f"), sequence);
            let checkpoint = Checkpoint {
                id: id.clone(),
                instance_code: instance.to_string(),
                level,
                description: description.to_string(),
                created_at,
                sequence,
                refs: refs.clone(),
            };

            match self.file(instance, &id).write_json_new(&checkpoint).await {
                Ok(()) => {
                    info!("Created {} checkpoint {} for {}: {}", level, id, instance, description);
                    return Ok(id);
                }
                Err(EngineError::IoError(e)) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!("Checkpoint id {} taken, trying next sequence", id);
                }
                Err(e) => return Err(e),
            }
        }

        Err(EngineError::Internal(format!(
            "Unable to allocate checkpoint id for {}",
            instance
        )))
    }

    /// Every checkpoint of an instance, oldest first
    pub async fn list(&self, instance: &str) -> Result<Vec<Checkpoint>, EngineError> {
        let mut checkpoints = Vec::new();
        for path in self.dir(instance).list_files_with_ext("json").await? {
            match File::new(&path).read_json::<Checkpoint>().await {
                Ok(checkpoint) => checkpoints.push(checkpoint),
                Err(e) => warn!("Ignoring unreadable checkpoint {}: {}", path.display(), e),
            }
        }

        checkpoints.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.sequence.cmp(&b.sequence))
        });
        Ok(checkpoints)
    }

    /// Id of the most recent checkpoint, the rollback target
    pub async fn find_latest(&self, instance: &str) -> Result<String, EngineError> {
        self.list(instance)
            .await?
            .pop()
            .map(|c| c.id)
            .ok_or_else(|| EngineError::CheckpointNotFound(instance.to_string()))
    }

    /// Read one checkpoint
    pub async fn load(&self, instance: &str, id: &str) -> Result<Checkpoint, EngineError> {
        self.file(instance, id)
            .read_json_opt::<Checkpoint>()
            .await?
            .ok_or_else(|| EngineError::CheckpointNotFound(format!("{}/{}", instance, id)))
    }
}
