//! Votes, polls and result tallies

use serde::{Deserialize, Serialize};
use votemesh_core::{Hash, Hashable, Timestamp};
use votemesh_crypto::hash;

/// A single vote cast on a poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub poll_id: String,
    pub choice: String,
    pub timestamp: Timestamp,
    /// Fingerprint of the voting device. Not enforced unique by the ledger.
    pub device_id: String,
}

impl Vote {
    pub fn new(poll_id: impl Into<String>, choice: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            poll_id: poll_id.into(),
            choice: choice.into(),
            timestamp: Timestamp::now(),
            device_id: device_id.into(),
        }
    }
}

impl Hashable for Vote {
    /// BLAKE3 over the JSON encoding of the vote
    fn hash(&self) -> Hash {
        hash(&serde_json::to_vec(self).unwrap_or_default())
    }
}

/// A poll that votes are cast on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub options: Vec<String>,
    pub created_at: Timestamp,
}

impl Poll {
    /// Create a poll with a fresh random id
    pub fn new(title: impl Into<String>, description: impl Into<String>, options: Vec<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            description: description.into(),
            options,
            created_at: Timestamp::now(),
        }
    }

    pub fn has_option(&self, choice: &str) -> bool {
        self.options.iter().any(|o| o == choice)
    }
}

/// Votes counted for one option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionTally {
    pub option: String,
    pub votes: u64,
}

/// Local result view of a poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResults {
    pub poll: Poll,
    pub results: Vec<OptionTally>,
    pub total_votes: u64,
}

/// Count votes per option in poll order.
///
/// Choices that are not options of the poll are not counted per option but
/// still add to the total.
pub fn tally(poll: &Poll, votes: &[Vote]) -> PollResults {
    let mut results: Vec<OptionTally> = poll
        .options
        .iter()
        .map(|option| OptionTally {
            option: option.clone(),
            votes: 0,
        })
        .collect();

    let mut total_votes = 0;
    for vote in votes.iter().filter(|v| v.poll_id == poll.id) {
        total_votes += 1;
        if let Some(entry) = results.iter_mut().find(|r| r.option == vote.choice) {
            entry.votes += 1;
        }
    }

    PollResults {
        poll: poll.clone(),
        results,
        total_votes,
    }
}
