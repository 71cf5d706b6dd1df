//! Deployment run configuration options

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::resilience::retry::RetryPolicy;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::utils::{Clock, SystemClock};

/// Wait used between step retries
pub type SleepFn = Arc<dyn Fn(Duration) -> BoxFuture<'static, ()> + Send + Sync>;

/// Sleep on the tokio timer
pub fn tokio_sleep() -> SleepFn {
    Arc::new(|wait| Box::pin(tokio::time::sleep(wait)))
}

/// Options for one deployment run
#[derive(Clone)]
pub struct RunOptions {
    /// Storage layout paths
    pub layout: StorageLayout,

    /// Retry budget for deployment steps
    pub retry: RetryPolicy,

    /// Time source for breakers, checkpoints and elapsed time
    pub clock: Arc<dyn Clock>,

    /// How retries wait
    pub sleep: SleepFn,
}

impl RunOptions {
    /// Options from a layout and loaded settings
    pub fn from_settings(layout: StorageLayout, settings: &Settings) -> Self {
        Self {
            layout,
            retry: RetryPolicy::from(&settings.retry),
            ..Default::default()
        }
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            layout: StorageLayout::default(),
            retry: RetryPolicy::default(),
            clock: Arc::new(SystemClock),
            sleep: tokio_sleep(),
        }
    }
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("layout", &self.layout)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
