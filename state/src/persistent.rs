//! Persistent record store using sled database

use async_trait::async_trait;
use sled::{Db, Tree};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use votemesh_core::{VotemeshError, VotemeshResult};

use crate::store::{RecordKind, RecordStore};

fn storage_err(e: sled::Error) -> VotemeshError {
    VotemeshError::StorageError(e.to_string())
}

/// Persistent record store backed by sled database, one tree per kind
pub struct SledRecordStore {
    db: Db,
    blocks: Tree,
    polls: Tree,
    votes: Tree,
    receipts: Tree,
}

impl SledRecordStore {
    pub fn open<P: AsRef<Path>>(path: P) -> VotemeshResult<Self> {
        let db = sled::open(path).map_err(storage_err)?;

        let blocks = db.open_tree(RecordKind::Blocks.as_str()).map_err(storage_err)?;
        let polls = db.open_tree(RecordKind::Polls.as_str()).map_err(storage_err)?;
        let votes = db.open_tree(RecordKind::Votes.as_str()).map_err(storage_err)?;
        let receipts = db.open_tree(RecordKind::Receipts.as_str()).map_err(storage_err)?;

        Ok(Self {
            db,
            blocks,
            polls,
            votes,
            receipts,
        })
    }

    fn tree(&self, kind: RecordKind) -> &Tree {
        match kind {
            RecordKind::Blocks => &self.blocks,
            RecordKind::Polls => &self.polls,
            RecordKind::Votes => &self.votes,
            RecordKind::Receipts => &self.receipts,
        }
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> VotemeshResult<()> {
        self.db.flush().map(|_| ()).map_err(storage_err)
    }

    /// Get database size estimate
    pub fn size_estimate(&self) -> u64 {
        RecordKind::ALL
            .iter()
            .map(|kind| self.tree(*kind).len() as u64)
            .sum()
    }
}

#[async_trait]
impl RecordStore for SledRecordStore {
    async fn save(&self, kind: RecordKind, id: &str, record: Vec<u8>) -> VotemeshResult<()> {
        self.tree(kind)
            .insert(id.as_bytes(), record)
            .map_err(storage_err)?;

        // A saved block must survive a crash before it is reported as committed
        self.tree(kind).flush_async().await.map_err(storage_err)?;
        debug!("Saved {} record {}", kind, id);
        Ok(())
    }

    async fn get(&self, kind: RecordKind, id: &str) -> VotemeshResult<Option<Vec<u8>>> {
        self.tree(kind)
            .get(id.as_bytes())
            .map(|opt| opt.map(|v| v.to_vec()))
            .map_err(storage_err)
    }

    async fn exists(&self, kind: RecordKind, id: &str) -> VotemeshResult<bool> {
        self.tree(kind)
            .contains_key(id.as_bytes())
            .map_err(storage_err)
    }

    async fn get_all(&self, kind: RecordKind) -> VotemeshResult<Vec<Vec<u8>>> {
        self.tree(kind)
            .iter()
            .values()
            .map(|result| result.map(|v| v.to_vec()).map_err(storage_err))
            .collect()
    }

    async fn count(&self, kind: RecordKind) -> VotemeshResult<usize> {
        Ok(self.tree(kind).len())
    }
}

/// Thread-safe persistent store wrapper
pub type SharedSledRecordStore = Arc<SledRecordStore>;

/// Create a shared persistent record store
pub fn create_persistent_store<P: AsRef<Path>>(path: P) -> VotemeshResult<SharedSledRecordStore> {
    Ok(Arc::new(SledRecordStore::open(path)?))
}
