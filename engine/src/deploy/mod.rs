//! Deployment module

pub mod checkpoint;
pub mod deps;
pub mod fsm;
pub mod state;
