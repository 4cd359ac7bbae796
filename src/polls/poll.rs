//! Poll definition
//!
//! The question and ordered option list an actor serves, plus the
//! selection policy fixed when the poll is created.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Default upper bound on the number of options in one poll
pub const DEFAULT_MAX_OPTIONS: usize = 50;

/// How many options a single voter may hold at once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VotePolicy {
    /// One option or none; voting for another option switches the vote
    #[default]
    Single,
    /// Any subset of options, each toggled independently
    Multiple,
}

impl VotePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            VotePolicy::Single => "single",
            VotePolicy::Multiple => "multiple",
        }
    }
}

impl std::fmt::Display for VotePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A poll as created by a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    /// Externally assigned poll ID
    pub id: String,
    /// Question shown to voters
    pub question: String,
    /// Option labels in display order
    pub options: Vec<String>,
    /// When the poll was (re)created (Unix ms)
    pub created: i64,
    /// Selection policy
    #[serde(default)]
    pub policy: VotePolicy,
}

impl Poll {
    /// Create a new single-selection poll stamped with the current time
    pub fn new(
        id: impl Into<String>,
        question: impl Into<String>,
        options: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            question: question.into(),
            options,
            created: chrono::Utc::now().timestamp_millis(),
            policy: VotePolicy::Single,
        }
    }

    /// Set the selection policy
    pub fn with_policy(mut self, policy: VotePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Override the creation timestamp
    pub fn with_created(mut self, created: i64) -> Self {
        self.created = created;
        self
    }

    /// Whether `label` is one of this poll's options
    pub fn has_option(&self, label: &str) -> bool {
        self.options.iter().any(|o| o == label)
    }

    /// Validate question and options
    pub fn validate(&self, max_options: usize) -> Result<(), String> {
        if self.question.trim().is_empty() {
            return Err("Poll question is required".to_string());
        }
        validate_options(&self.options, max_options)
    }
}

/// Validate an option list: at least two, at most `max_options`,
/// non-blank and pairwise distinct.
pub fn validate_options(options: &[String], max_options: usize) -> Result<(), String> {
    if options.len() < 2 {
        return Err("Poll must have at least 2 options".to_string());
    }
    if options.len() > max_options {
        return Err(format!(
            "Poll cannot have more than {} options",
            max_options
        ));
    }

    let mut seen = HashSet::new();
    for option in options {
        if option.trim().is_empty() {
            return Err("Poll options must not be empty".to_string());
        }
        if !seen.insert(option.as_str()) {
            return Err(format!("Duplicate option: {}", option));
        }
    }
    Ok(())
}
