//! VOTEMESH Node Implementation
//! 
//! Combines the components of one voting device:
//! - Ledger and record store
//! - Sync over the local bus and the relay
//! - Optional audit backend
//! - Local HTTP API

mod api;
mod audit;
mod node;
mod runtime;

pub use api::*;
pub use audit::*;
pub use node::*;
pub use runtime::*;
