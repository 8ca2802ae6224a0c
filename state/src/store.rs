//! Record store traits and types

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::sync::Arc;
use votemesh_core::{VotemeshError, VotemeshResult};

/// Kind of record kept in the local store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKind {
    Blocks,
    Polls,
    Votes,
    Receipts,
}

impl RecordKind {
    pub const ALL: [RecordKind; 4] = [
        RecordKind::Blocks,
        RecordKind::Polls,
        RecordKind::Votes,
        RecordKind::Receipts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Blocks => "blocks",
            RecordKind::Polls => "polls",
            RecordKind::Votes => "votes",
            RecordKind::Receipts => "receipts",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the record id for an index-addressed record.
///
/// Zero padding keeps lexicographic id order equal to numeric index order.
pub fn index_key(index: u64) -> String {
    format!("{:020}", index)
}

/// Durable local store addressed by `(kind, id)`.
///
/// Implementations must be safe to call concurrently; `get_all` returns
/// records ordered by id.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or overwrite a record
    async fn save(&self, kind: RecordKind, id: &str, record: Vec<u8>) -> VotemeshResult<()>;

    /// Fetch one record
    async fn get(&self, kind: RecordKind, id: &str) -> VotemeshResult<Option<Vec<u8>>>;

    /// Fetch every record of a kind, ordered by id
    async fn get_all(&self, kind: RecordKind) -> VotemeshResult<Vec<Vec<u8>>>;

    /// Check if a record exists
    async fn exists(&self, kind: RecordKind, id: &str) -> VotemeshResult<bool> {
        Ok(self.get(kind, id).await?.is_some())
    }

    /// Number of records of a kind
    async fn count(&self, kind: RecordKind) -> VotemeshResult<usize> {
        Ok(self.get_all(kind).await?.len())
    }
}

/// Typed JSON helpers on top of any [`RecordStore`]
#[async_trait]
pub trait RecordStoreExt: RecordStore {
    /// Serialize and save a record
    async fn save_record<T>(&self, kind: RecordKind, id: &str, record: &T) -> VotemeshResult<()>
    where
        T: Serialize + Sync,
    {
        let bytes = serde_json::to_vec(record)?;
        self.save(kind, id, bytes).await
    }

    /// Load and deserialize one record
    async fn get_record<T>(&self, kind: RecordKind, id: &str) -> VotemeshResult<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(kind, id).await? {
            Some(bytes) => Ok(Some(decode_record(kind, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Load and deserialize every record of a kind
    async fn get_all_records<T>(&self, kind: RecordKind) -> VotemeshResult<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        self.get_all(kind)
            .await?
            .iter()
            .map(|bytes| decode_record(kind, bytes))
            .collect()
    }
}

impl<S: RecordStore + ?Sized> RecordStoreExt for S {}

fn decode_record<T: DeserializeOwned>(kind: RecordKind, bytes: &[u8]) -> VotemeshResult<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| VotemeshError::DeserializationError(format!("{} record: {}", kind, e)))
}

/// Shared, type-erased store handle used by the node runtime
pub type SharedRecordStore = Arc<dyn RecordStore>;
