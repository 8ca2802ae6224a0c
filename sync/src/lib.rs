//! VOTEMESH Sync Orchestrator
//! 
//! Wires the ledger to every attached transport: publishes local votes and
//! polls, merges what peers send and answers sync requests.

pub mod events;
pub mod orchestrator;

pub use events::*;
pub use orchestrator::*;
