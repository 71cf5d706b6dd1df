//! Deployment run wiring

pub mod options;
pub mod run;
