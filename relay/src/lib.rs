//! VOTEMESH Relay
//! 
//! A stateless message switch for peers that cannot reach each other
//! directly. It tracks who is connected and which rooms they joined, and
//! forwards frames without looking inside them.

pub mod registry;
pub mod session;
pub mod server;

pub use registry::*;
pub use session::*;
pub use server::*;
