//! Events observed by the node and API layers

use serde::Serialize;
use tokio::sync::broadcast;
use votemesh_ledger::Conflict;

/// Where a change came from: `"local"` for this node, else a transport name
pub type Source = String;

/// Something the orchestrator changed or noticed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum SyncEvent {
    BlockAppended { index: u64, source: Source },
    PollSaved { id: String, source: Source },
    /// A peer holds a different block at an index we already have
    Conflict { conflict: Conflict, source: Source },
    SyncMerged { appended: usize, source: Source },
    /// The local chain no longer validates
    AuditFailed { index: u64, reason: String },
}

/// Default capacity of the event channel
pub const EVENT_CAPACITY: usize = 256;

pub type SyncEventSender = broadcast::Sender<SyncEvent>;
pub type SyncEventReceiver = broadcast::Receiver<SyncEvent>;
