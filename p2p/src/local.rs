//! In-process fan-out channel
//!
//! Contexts that share a process join one [`LocalBus`] and sync without a
//! network round trip. A channel never sees its own messages.

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use votemesh_core::VotemeshResult;

use crate::message::{Envelope, MessageKind};
use crate::transport::{HandlerTable, MessageHandler, PubSubTransport};

/// Default capacity of the bus buffer
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct LocalFrame {
    origin: u64,
    envelope: Envelope,
}

/// Process-wide broadcast bus
pub struct LocalBus {
    tx: broadcast::Sender<LocalFrame>,
    next_id: AtomicU64,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            next_id: AtomicU64::new(1),
        }
    }

    /// Join the bus. Must be called from within a tokio runtime.
    pub fn join(&self) -> LocalChannel {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handlers = Arc::new(HandlerTable::new());
        let mut rx = self.tx.subscribe();

        let task_handlers = handlers.clone();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(frame) => {
                        if frame.origin == id {
                            continue;
                        }
                        let kind = frame.envelope.kind;
                        if !task_handlers.dispatch(kind, frame.envelope.data) {
                            debug!("Local channel {} has no handler for {}", id, kind);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Local channel {} lagged {} messages", id, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        LocalChannel {
            id,
            tx: self.tx.clone(),
            handlers,
            task: Mutex::new(Some(task)),
        }
    }

    /// Number of joined channels
    pub fn member_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

/// Shared local bus
pub type SharedLocalBus = Arc<LocalBus>;

/// Create a shared local bus
pub fn create_local_bus() -> SharedLocalBus {
    Arc::new(LocalBus::default())
}

/// One context's handle on a [`LocalBus`]
pub struct LocalChannel {
    id: u64,
    tx: broadcast::Sender<LocalFrame>,
    handlers: Arc<HandlerTable>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LocalChannel {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stop receiving and drop all handlers
    pub fn close(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.handlers.clear();
    }
}

impl PubSubTransport for LocalChannel {
    fn name(&self) -> &str {
        "local"
    }

    fn subscribe(&self, kind: MessageKind, handler: MessageHandler) {
        self.handlers.set(kind, handler);
    }

    fn broadcast(&self, kind: MessageKind, payload: Value) -> VotemeshResult<()> {
        let frame = LocalFrame {
            origin: self.id,
            envelope: Envelope::new(kind, payload),
        };
        // Only fails when nobody is listening
        if self.tx.send(frame).is_err() {
            debug!("Local bus has no listeners for {}", kind);
        }
        Ok(())
    }
}

impl Drop for LocalChannel {
    fn drop(&mut self) {
        self.close();
    }
}
