//! VOTEMESH Local Storage
//! 
//! The durable local store for blocks, polls, votes and receipts.
//! Records are JSON documents addressed by `(kind, id)`.

pub mod store;
pub mod memory;
pub mod persistent;

pub use store::*;
pub use memory::*;
pub use persistent::*;
