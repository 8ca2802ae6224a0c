//! VOTEMESH Ledger Engine
//! 
//! An append-only, hash-chained log of vote events:
//! - Block construction, hashing and signing
//! - Local validation of single blocks and the whole chain
//! - Admission of blocks heard from other peers
//! - Downgrade detection, receipts and poll tallies

pub mod vote;
pub mod block;
pub mod chain;
pub mod poll;
pub mod receipt;

pub use vote::*;
pub use block::*;
pub use chain::*;
pub use poll::*;
pub use receipt::*;
