//! Tally Store
//!
//! Per-option vote counts plus every voter's current selection for one
//! poll. The store is plain data: the owning actor decides when a
//! mutation is persisted and committed.
//!
//! Invariant: for every option `X`, `tally[X]` equals the number of
//! voters whose selection contains `X`.

use super::poll::{validate_options, VotePolicy};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Voter ID -> selected option labels (in poll option order).
/// Voters with an empty selection have no entry.
pub type UserVotes = BTreeMap<String, Vec<String>>;

/// Tally store errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TallyError {
    #[error("invalid poll: {0}")]
    InvalidPoll(String),
    #[error("unknown option: {0}")]
    UnknownOption(String),
    #[error("poll not initialized")]
    NotInitialized,
}

/// Vote counts keyed by option label, kept in poll option order.
///
/// Serializes as a JSON object whose keys follow option order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally {
    entries: Vec<(String, u64)>,
}

impl Tally {
    /// A zero count for every option
    pub fn zeroed(options: &[String]) -> Self {
        Self {
            entries: options.iter().map(|o| (o.clone(), 0)).collect(),
        }
    }

    /// Count for `label`, or `None` if it is not an option
    pub fn get(&self, label: &str) -> Option<u64> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, count)| *count)
    }

    /// Sum of all counts
    pub fn total(&self) -> u64 {
        self.entries.iter().map(|(_, count)| count).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().map(|(l, c)| (l.as_str(), *c))
    }

    /// Option labels in order
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(l, _)| l.as_str())
    }

    fn position(&self, label: &str) -> Option<usize> {
        self.entries.iter().position(|(l, _)| l == label)
    }

    fn increment(&mut self, label: &str) {
        if let Some((_, count)) = self.entries.iter_mut().find(|(l, _)| l == label) {
            *count += 1;
        }
    }

    fn decrement(&mut self, label: &str) {
        if let Some((_, count)) = self.entries.iter_mut().find(|(l, _)| l == label) {
            *count = count.saturating_sub(1);
        }
    }
}

impl Serialize for Tally {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (label, count) in &self.entries {
            map.serialize_entry(label, count)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Tally {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TallyVisitor;

        impl<'de> Visitor<'de> for TallyVisitor {
            type Value = Tally;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of option label to vote count")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Tally, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((label, count)) = access.next_entry::<String, u64>()? {
                    entries.push((label, count));
                }
                Ok(Tally { entries })
            }
        }

        deserializer.deserialize_map(TallyVisitor)
    }
}

/// What a vote did to the voter's selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteAction {
    /// Option added to the selection
    Vote,
    /// Option removed from the selection
    Unvote,
    /// Single-selection vote moved from one option to another
    Switch,
}

impl VoteAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteAction::Vote => "vote",
            VoteAction::Unvote => "unvote",
            VoteAction::Switch => "switch",
        }
    }
}

/// Result of one vote transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteOutcome {
    pub action: VoteAction,
    /// Option the voter acted on
    pub option: String,
    pub voter_id: String,
    /// Voter's selection after the transition
    pub selection: Vec<String>,
    pub tally: Tally,
    pub total: u64,
}

/// Tally and per-voter state for one poll
#[derive(Debug, Clone, Default)]
pub struct TallyStore {
    policy: VotePolicy,
    /// `None` until the poll is initialized
    tally: Option<Tally>,
    user_votes: UserVotes,
}

impl TallyStore {
    /// An uninitialized store
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to zero counts for exactly `options` and clear every voter's
    /// selection.
    pub fn initialize(&mut self, options: &[String], policy: VotePolicy) -> Result<(), TallyError> {
        validate_options(options, usize::MAX).map_err(TallyError::InvalidPoll)?;
        self.policy = policy;
        self.tally = Some(Tally::zeroed(options));
        self.user_votes.clear();
        Ok(())
    }

    /// Rebuild a store from persisted records.
    ///
    /// Selections naming unknown options are dropped. The tally is derived
    /// from the selections; the returned flag is `true` when the persisted
    /// tally disagreed with them and had to be rebuilt.
    pub fn restore(
        options: &[String],
        policy: VotePolicy,
        persisted: Option<&Tally>,
        user_votes: UserVotes,
    ) -> Result<(Self, bool), TallyError> {
        let mut store = Self::new();
        store.initialize(options, policy)?;

        let tally = store.tally.get_or_insert_with(|| Tally::zeroed(options));
        for (voter_id, selection) in user_votes {
            let mut kept: Vec<String> = selection
                .into_iter()
                .filter(|label| tally.position(label).is_some())
                .collect();
            kept.sort_by_key(|label| tally.position(label));
            kept.dedup();
            if policy == VotePolicy::Single {
                kept.truncate(1);
            }
            if kept.is_empty() {
                continue;
            }
            for label in &kept {
                tally.increment(label);
            }
            store.user_votes.insert(voter_id, kept);
        }

        let repaired = persisted != store.tally.as_ref();
        Ok((store, repaired))
    }

    pub fn is_initialized(&self) -> bool {
        self.tally.is_some()
    }

    pub fn policy(&self) -> VotePolicy {
        self.policy
    }

    /// Apply one vote from `voter_id` for `option` using toggle semantics.
    pub fn apply_vote(&mut self, option: &str, voter_id: &str) -> Result<VoteOutcome, TallyError> {
        let tally = self.tally.as_mut().ok_or(TallyError::NotInitialized)?;
        if tally.position(option).is_none() {
            return Err(TallyError::UnknownOption(option.to_string()));
        }

        let selection = self.user_votes.entry(voter_id.to_string()).or_default();
        let action = match self.policy {
            VotePolicy::Single => {
                if selection.len() == 1 && selection[0] == option {
                    selection.clear();
                    tally.decrement(option);
                    VoteAction::Unvote
                } else if selection.is_empty() {
                    selection.push(option.to_string());
                    tally.increment(option);
                    VoteAction::Vote
                } else {
                    for previous in selection.drain(..) {
                        tally.decrement(&previous);
                    }
                    selection.push(option.to_string());
                    tally.increment(option);
                    VoteAction::Switch
                }
            }
            VotePolicy::Multiple => {
                if let Some(pos) = selection.iter().position(|l| l == option) {
                    selection.remove(pos);
                    tally.decrement(option);
                    VoteAction::Unvote
                } else {
                    selection.push(option.to_string());
                    selection.sort_by_key(|label| tally.position(label));
                    tally.increment(option);
                    VoteAction::Vote
                }
            }
        };

        let selection = selection.clone();
        if selection.is_empty() {
            self.user_votes.remove(voter_id);
        }

        let tally = tally.clone();
        let total = tally.total();
        Ok(VoteOutcome {
            action,
            option: option.to_string(),
            voter_id: voter_id.to_string(),
            selection,
            tally,
            total,
        })
    }

    /// Consistent copy of the tally and all selections
    pub fn snapshot(&self) -> Result<(Tally, UserVotes), TallyError> {
        let tally = self.tally.as_ref().ok_or(TallyError::NotInitialized)?;
        Ok((tally.clone(), self.user_votes.clone()))
    }

    /// Current tally, if initialized
    pub fn tally(&self) -> Option<&Tally> {
        self.tally.as_ref()
    }

    /// One voter's selection (empty if they hold none)
    pub fn selection(&self, voter_id: &str) -> Vec<String> {
        self.user_votes.get(voter_id).cloned().unwrap_or_default()
    }

    /// Sum of all counts
    pub fn total(&self) -> u64 {
        self.tally.as_ref().map(Tally::total).unwrap_or(0)
    }

    /// Number of voters currently holding a non-empty selection
    pub fn voter_count(&self) -> usize {
        self.user_votes.len()
    }

    /// Whether the tally agrees with the per-voter selections
    pub fn is_consistent(&self) -> bool {
        let Some(tally) = self.tally.as_ref() else {
            return self.user_votes.is_empty();
        };
        tally.iter().all(|(label, count)| {
            let holders = self
                .user_votes
                .values()
                .filter(|selection| selection.iter().any(|l| l == label))
                .count() as u64;
            holders == count
        }) && self
            .user_votes
            .values()
            .flatten()
            .all(|label| tally.get(label).is_some())
    }
}
