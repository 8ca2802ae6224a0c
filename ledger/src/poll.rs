//! Poll book

use tracing::debug;
use votemesh_core::{VotemeshError, VotemeshResult};
use votemesh_state::{RecordKind, RecordStore, RecordStoreExt, SharedRecordStore};

use crate::vote::{tally, Poll, PollResults, Vote};

/// Stored polls, deduplicated by id
pub struct PollBook {
    store: SharedRecordStore,
}

impl PollBook {
    pub fn new(store: SharedRecordStore) -> Self {
        Self { store }
    }

    /// Save a poll unless one with the same id exists. Returns true if saved.
    pub async fn save_if_new(&self, poll: &Poll) -> VotemeshResult<bool> {
        if self.store.exists(RecordKind::Polls, &poll.id).await? {
            debug!("Poll {} already known", poll.id);
            return Ok(false);
        }
        self.store.save_record(RecordKind::Polls, &poll.id, poll).await?;
        Ok(true)
    }

    pub async fn get(&self, id: &str) -> VotemeshResult<Option<Poll>> {
        self.store.get_record(RecordKind::Polls, id).await
    }

    pub async fn all(&self) -> VotemeshResult<Vec<Poll>> {
        self.store.get_all_records(RecordKind::Polls).await
    }

    /// Votes cast on this device for a poll
    pub async fn votes_for(&self, poll_id: &str) -> VotemeshResult<Vec<Vote>> {
        let votes: Vec<Vote> = self.store.get_all_records(RecordKind::Votes).await?;
        Ok(votes.into_iter().filter(|v| v.poll_id == poll_id).collect())
    }

    /// Tally the local votes of a poll
    pub async fn results(&self, poll_id: &str) -> VotemeshResult<PollResults> {
        let poll = self
            .get(poll_id)
            .await?
            .ok_or_else(|| VotemeshError::PollNotFound(poll_id.to_string()))?;
        let votes = self.votes_for(poll_id).await?;
        Ok(tally(&poll, &votes))
    }
}
