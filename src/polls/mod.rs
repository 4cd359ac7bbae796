//! Polling Module
//!
//! Real-time polls: each poll is owned by its own actor, which validates
//! and applies vote toggles, persists the result and pushes the change to
//! every live viewer of that poll.

pub mod actor;
pub mod error;
pub mod events;
pub mod hub;
pub mod poll;
pub mod registry;
pub mod storage;
pub mod tally;

pub use actor::{PollHandle, PollSettings, PollStatus, Subscription};
pub use error::PollError;
pub use events::{PollEvent, PollView, VoteReceipt};
pub use hub::{Payload, SessionId, SubscriptionHub};
pub use poll::{Poll, VotePolicy, DEFAULT_MAX_OPTIONS};
pub use registry::PollRegistry;
pub use storage::{FileStorage, MemoryStorage, PollRecord, PollStorage, StorageError};
pub use tally::{Tally, TallyError, TallyStore, UserVotes, VoteAction, VoteOutcome};
