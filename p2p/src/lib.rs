//! VOTEMESH Peer Transports
//! 
//! Two interchangeable publish/subscribe transports:
//! - `LocalChannel` for contexts sharing one process
//! - `RelayClient` for peers reached through a WebSocket relay

pub mod message;
pub mod transport;
pub mod local;
pub mod client;
pub mod peer;

pub use message::*;
pub use transport::*;
pub use local::*;
pub use client::*;
pub use peer::*;
