//! Publish/subscribe transport capability

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use votemesh_core::VotemeshResult;

use crate::message::MessageKind;

/// Callback invoked with the payload of an incoming message
pub type MessageHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Surface shared by the local fan-out channel and the relay client
pub trait PubSubTransport: Send + Sync {
    /// Short name used in logs and sync requests
    fn name(&self) -> &str;

    /// Register the handler for a message kind. The last registration wins.
    fn subscribe(&self, kind: MessageKind, handler: MessageHandler);

    /// Publish a message to every other participant
    fn broadcast(&self, kind: MessageKind, payload: Value) -> VotemeshResult<()>;
}

/// Shared transport handle
pub type SharedTransport = Arc<dyn PubSubTransport>;

/// One handler per message kind
#[derive(Default)]
pub struct HandlerTable {
    handlers: RwLock<HashMap<MessageKind, MessageHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, kind: MessageKind, handler: MessageHandler) {
        self.handlers.write().insert(kind, handler);
    }

    /// Invoke the handler for `kind`. Returns false if none is registered.
    pub fn dispatch(&self, kind: MessageKind, payload: Value) -> bool {
        // Clone out of the lock so a handler may re-subscribe
        let handler = self.handlers.read().get(&kind).cloned();
        match handler {
            Some(handler) => {
                handler(payload);
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        self.handlers.write().clear();
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[test]
    fn test_last_registration_wins() {
        let table = HandlerTable::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = seen.clone();
        table.set(MessageKind::NewBlock, Arc::new(move |_| first.lock().push("first")));
        let second = seen.clone();
        table.set(MessageKind::NewBlock, Arc::new(move |_| second.lock().push("second")));

        assert!(table.dispatch(MessageKind::NewBlock, json!({})));
        assert!(!table.dispatch(MessageKind::NewPoll, json!({})));
        assert_eq!(*seen.lock(), vec!["second"]);
        assert_eq!(table.len(), 1);
    }
}
