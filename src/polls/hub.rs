//! Subscription Hub
//!
//! Live viewer sessions for one poll. The hub is owned by the poll's
//! actor, so it needs no locking; every session gets its own bounded
//! queue and sees events in the order the actor produced them.

use super::events::PollEvent;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, warn};

/// Identifies one session within a hub
pub type SessionId = u64;

/// Encoded event as delivered to a session
pub type Payload = Arc<str>;

/// Smallest session queue: registering queues the replay and the viewer
/// count back to back
pub const MIN_QUEUE_SIZE: usize = 2;

/// A live viewer connection
#[derive(Debug)]
struct Session {
    voter_id: String,
    /// Connected at (Unix ms)
    connected_at: i64,
    tx: mpsc::Sender<Payload>,
}

/// Set of live sessions for one poll
#[derive(Debug)]
pub struct SubscriptionHub {
    poll_id: String,
    sessions: HashMap<SessionId, Session>,
    next_id: SessionId,
    queue_size: usize,
}

impl SubscriptionHub {
    /// Create an empty hub; each session queue holds `queue_size` events,
    /// never fewer than [`MIN_QUEUE_SIZE`]
    pub fn new(poll_id: impl Into<String>, queue_size: usize) -> Self {
        Self {
            poll_id: poll_id.into(),
            sessions: HashMap::new(),
            next_id: 1,
            queue_size: queue_size.max(MIN_QUEUE_SIZE),
        }
    }

    /// Add a session whose queue starts with `initial`, then announce the
    /// new viewer count to everyone.
    pub fn register(
        &mut self,
        voter_id: &str,
        initial: &PollEvent,
    ) -> (SessionId, mpsc::Receiver<Payload>) {
        let (tx, rx) = mpsc::channel(self.queue_size);
        match initial.encode() {
            Ok(payload) => {
                // Fresh queue, cannot be full
                let _ = tx.try_send(payload);
            }
            Err(err) => {
                error!(poll_id = %self.poll_id, error = %err, "failed to encode initial event");
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        self.sessions.insert(
            id,
            Session {
                voter_id: voter_id.to_string(),
                connected_at: chrono::Utc::now().timestamp_millis(),
                tx,
            },
        );
        debug!(poll_id = %self.poll_id, session_id = id, voter_id = %voter_id, "session registered");

        self.broadcast_user_count();
        (id, rx)
    }

    /// Remove a session. Returns `false` if it was already gone.
    pub fn unregister(&mut self, id: SessionId) -> bool {
        let Some(session) = self.sessions.remove(&id) else {
            return false;
        };
        debug!(
            poll_id = %self.poll_id,
            session_id = id,
            voter_id = %session.voter_id,
            connected_ms = chrono::Utc::now().timestamp_millis() - session.connected_at,
            "session unregistered"
        );
        self.broadcast_user_count();
        true
    }

    /// Push `event` to every session.
    ///
    /// Sessions that cannot take the event (receiver gone or queue full)
    /// are dropped, and the remaining sessions are told the new count.
    pub fn broadcast(&mut self, event: &PollEvent) {
        let mut dropped = self.fan_out(event);
        while dropped > 0 {
            let count = PollEvent::UserCount {
                count: self.sessions.len(),
            };
            dropped = self.fan_out(&count);
        }
    }

    /// Drop sessions whose receiver has gone away. Returns how many were
    /// removed.
    pub fn prune_closed(&mut self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.tx.is_closed());
        let removed = before - self.sessions.len();
        if removed > 0 {
            debug!(poll_id = %self.poll_id, removed, "pruned closed sessions");
            self.broadcast_user_count();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    #[cfg(test)]
    fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    #[cfg(test)]
    fn voter_ids(&self) -> Vec<&str> {
        self.sessions.values().map(|s| s.voter_id.as_str()).collect()
    }

    fn broadcast_user_count(&mut self) {
        let count = PollEvent::UserCount {
            count: self.sessions.len(),
        };
        self.broadcast(&count);
    }

    fn fan_out(&mut self, event: &PollEvent) -> usize {
        if self.sessions.is_empty() {
            return 0;
        }
        let payload = match event.encode() {
            Ok(payload) => payload,
            Err(err) => {
                error!(poll_id = %self.poll_id, event = event.kind(), error = %err, "failed to encode event");
                return 0;
            }
        };

        let mut dropped = Vec::new();
        for (id, session) in &self.sessions {
            match session.tx.try_send(payload.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(poll_id = %self.poll_id, session_id = *id, "session queue full, disconnecting");
                    dropped.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(poll_id = %self.poll_id, session_id = *id, "session closed");
                    dropped.push(*id);
                }
            }
        }
        for id in &dropped {
            self.sessions.remove(id);
        }
        dropped.len()
    }
}
