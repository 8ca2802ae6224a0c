//! VOTEMESH Core Library
//! 
//! Core types, traits, and configuration shared by every VOTEMESH crate:
//! the ledger, the sync layer, the relay and the node.

pub mod types;
pub mod traits;
pub mod error;
pub mod config;

pub use types::*;
pub use traits::*;
pub use error::*;
pub use config::*;
