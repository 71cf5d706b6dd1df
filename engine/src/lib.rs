//! Hub-and-Spoke Orchestration Engine
//!
//! Sequencing, resumption and abort decisions for multi-instance
//! federation deployments.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod resilience;
pub mod storage;
pub mod utils;
