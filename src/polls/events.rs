//! Wire types pushed to viewers and returned to callers.

use super::poll::Poll;
use super::tally::{Tally, VoteAction, VoteOutcome};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Event pushed to every live session of a poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PollEvent {
    /// Full state: sent on subscribe and after a (re)create
    PollData {
        poll: Poll,
        votes: Tally,
        total: u64,
        /// Receiving voter's selection; empty on a create broadcast
        #[serde(rename = "userVotes")]
        user_votes: Vec<String>,
    },
    /// Result of one vote
    VoteUpdate {
        votes: Tally,
        total: u64,
        action: VoteAction,
        option: String,
        #[serde(rename = "voterId")]
        voter_id: String,
        #[serde(rename = "userVotes")]
        user_votes: Vec<String>,
    },
    /// Number of live sessions
    UserCount { count: usize },
}

impl PollEvent {
    pub fn full_state(poll: &Poll, votes: &Tally, user_votes: Vec<String>) -> Self {
        PollEvent::PollData {
            poll: poll.clone(),
            votes: votes.clone(),
            total: votes.total(),
            user_votes,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PollEvent::PollData { .. } => "poll_data",
            PollEvent::VoteUpdate { .. } => "vote_update",
            PollEvent::UserCount { .. } => "user_count",
        }
    }

    /// Serialize once for fan-out
    pub fn encode(&self) -> Result<Arc<str>, serde_json::Error> {
        serde_json::to_string(self).map(Arc::from)
    }
}

impl From<&VoteOutcome> for PollEvent {
    fn from(outcome: &VoteOutcome) -> Self {
        PollEvent::VoteUpdate {
            votes: outcome.tally.clone(),
            total: outcome.total,
            action: outcome.action,
            option: outcome.option.clone(),
            voter_id: outcome.voter_id.clone(),
            user_votes: outcome.selection.clone(),
        }
    }
}

/// Full state of a poll as seen by one voter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollView {
    #[serde(flatten)]
    pub poll: Poll,
    pub votes: Tally,
    pub total: u64,
    pub user_votes: Vec<String>,
    pub voter_id: String,
}

/// Reply to a vote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteReceipt {
    pub success: bool,
    pub action: VoteAction,
    pub option: String,
    pub user_votes: Vec<String>,
    pub votes: Tally,
    pub total: u64,
    pub voter_id: String,
}

impl From<VoteOutcome> for VoteReceipt {
    fn from(outcome: VoteOutcome) -> Self {
        Self {
            success: true,
            action: outcome.action,
            option: outcome.option,
            user_votes: outcome.selection,
            votes: outcome.tally,
            total: outcome.total,
            voter_id: outcome.voter_id,
        }
    }
}
