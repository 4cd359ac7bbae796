//! Poll persistence
//!
//! Every poll is stored as three records: metadata, tally and per-voter
//! selections. All three are rewritten on every mutation; the actor does
//! not acknowledge a mutation until `save` returns.
//!
//! `FileStorage` replaces each record atomically but not the three as a
//! set. Selections are written first and the tally is rebuilt from them
//! on load, so a vote torn mid-save loses nothing. A recreate torn before
//! `meta.json` is replaced loads as the previous question and options with
//! no votes.

use super::poll::Poll;
use super::tally::{Tally, UserVotes};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

const META_FILE: &str = "meta.json";
const TALLY_FILE: &str = "tally.json";
const VOTES_FILE: &str = "votes.json";

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("corrupt record {file} for poll {poll_id}: {reason}")]
    Corrupt {
        poll_id: String,
        file: String,
        reason: String,
    },
}

/// Everything persisted for one poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollRecord {
    pub poll: Poll,
    /// Empty when the tally record was missing on load
    pub tally: Tally,
    pub votes: UserVotes,
}

/// Durable home for poll state
#[async_trait]
pub trait PollStorage: Send + Sync + std::fmt::Debug {
    /// Load a poll, or `None` if it was never created
    async fn load(&self, poll_id: &str) -> Result<Option<PollRecord>, StorageError>;

    /// Replace everything stored for a poll
    async fn save(&self, poll_id: &str, record: &PollRecord) -> Result<(), StorageError>;
}

/// One directory per poll, one JSON file per record
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one poll's records. Poll IDs are client supplied
    /// and unbounded, so the name is the hex SHA-256 of the ID; the ID
    /// itself is kept in `meta.json`.
    pub fn poll_dir(&self, poll_id: &str) -> PathBuf {
        self.root.join(hex::encode(Sha256::digest(poll_id.as_bytes())))
    }
}

#[async_trait]
impl PollStorage for FileStorage {
    async fn load(&self, poll_id: &str) -> Result<Option<PollRecord>, StorageError> {
        let dir = self.poll_dir(poll_id);
        let Some(poll) = read_record::<Poll>(poll_id, &dir.join(META_FILE)).await? else {
            return Ok(None);
        };
        let tally = read_record::<Tally>(poll_id, &dir.join(TALLY_FILE))
            .await?
            .unwrap_or_default();
        let votes = read_record::<UserVotes>(poll_id, &dir.join(VOTES_FILE))
            .await?
            .unwrap_or_default();
        Ok(Some(PollRecord { poll, tally, votes }))
    }

    async fn save(&self, poll_id: &str, record: &PollRecord) -> Result<(), StorageError> {
        let dir = self.poll_dir(poll_id);
        tokio::fs::create_dir_all(&dir).await?;
        // Selections first: on load the tally is derived from them
        write_atomic(&dir.join(VOTES_FILE), &record.votes).await?;
        write_atomic(&dir.join(TALLY_FILE), &record.tally).await?;
        write_atomic(&dir.join(META_FILE), &record.poll).await?;
        Ok(())
    }
}

async fn read_record<T: DeserializeOwned>(
    poll_id: &str,
    path: &Path,
) -> Result<Option<T>, StorageError> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|err| StorageError::Corrupt {
            poll_id: poll_id.to_string(),
            file: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            reason: err.to_string(),
        })
}

/// Write to a sibling temp file, flush it to disk, then rename over `path`.
async fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let content = serde_json::to_vec_pretty(value)?;
    let tmp_path = path.with_extension("json.tmp");
    {
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(&content).await?;
        file.write_all(b"\n").await?;
        file.sync_all().await?;
    }
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

/// In-process storage; state is lost on restart
#[derive(Debug, Default)]
pub struct MemoryStorage {
    records: Mutex<HashMap<String, PollRecord>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored polls
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl PollStorage for MemoryStorage {
    async fn load(&self, poll_id: &str) -> Result<Option<PollRecord>, StorageError> {
        Ok(self.records.lock().get(poll_id).cloned())
    }

    async fn save(&self, poll_id: &str, record: &PollRecord) -> Result<(), StorageError> {
        self.records
            .lock()
            .insert(poll_id.to_string(), record.clone());
        Ok(())
    }
}
