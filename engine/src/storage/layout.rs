//! On-disk layout of engine state
//!
//! ```text
//! <base>/settings.json
//! <base>/logs/
//! <base>/instances/<code>/state.json
//! <base>/instances/<code>/checkpoints/<id>.json
//! ```

use std::path::PathBuf;

use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Environment variable overriding the base directory
pub const HOME_ENV: &str = "HUBSPOKE_HOME";

#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub base_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Directory owned by one instance; codes are case-insensitive
    pub fn instance_dir(&self, instance: &str) -> Dir {
        Dir::new(self.base_dir.join("instances")).subdir(&instance.to_lowercase())
    }

    pub fn state_file(&self, instance: &str) -> File {
        self.instance_dir(instance).file("state.json")
    }

    pub fn checkpoints_dir(&self, instance: &str) -> Dir {
        self.instance_dir(instance).subdir("checkpoints")
    }
}

impl Default for StorageLayout {
    /// `$HUBSPOKE_HOME`, else `/etc/hubspoke` on Linux and `~/.hubspoke` elsewhere
    fn default() -> Self {
        if let Some(home) = std::env::var_os(HOME_ENV) {
            return Self::new(home);
        }

        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/etc/hubspoke");

        #[cfg(not(target_os = "linux"))]
        let base_dir = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".hubspoke");

        Self::new(base_dir)
    }
}
