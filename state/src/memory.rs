//! In-memory record store for testing and ephemeral nodes

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use votemesh_core::VotemeshResult;

use crate::store::{RecordKind, RecordStore};

/// In-memory record store
pub struct MemoryRecordStore {
    data: DashMap<(RecordKind, String), Vec<u8>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Total number of records across all kinds
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn save(&self, kind: RecordKind, id: &str, record: Vec<u8>) -> VotemeshResult<()> {
        self.data.insert((kind, id.to_string()), record);
        Ok(())
    }

    async fn get(&self, kind: RecordKind, id: &str) -> VotemeshResult<Option<Vec<u8>>> {
        Ok(self
            .data
            .get(&(kind, id.to_string()))
            .map(|v| v.value().clone()))
    }

    async fn get_all(&self, kind: RecordKind) -> VotemeshResult<Vec<Vec<u8>>> {
        let mut records: Vec<(String, Vec<u8>)> = self
            .data
            .iter()
            .filter(|entry| entry.key().0 == kind)
            .map(|entry| (entry.key().1.clone(), entry.value().clone()))
            .collect();
        records.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(records.into_iter().map(|(_, v)| v).collect())
    }
}

/// Thread-safe memory store wrapper
pub type SharedMemoryRecordStore = Arc<MemoryRecordStore>;

/// Create a shared memory store
pub fn create_memory_store() -> SharedMemoryRecordStore {
    Arc::new(MemoryRecordStore::new())
}
