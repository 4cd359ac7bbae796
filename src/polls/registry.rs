//! Poll Registry
//!
//! Maps poll IDs to running actors. The first request for an ID starts its
//! actor; idle actors remove themselves and are started again on demand.
//! After `shutdown` every actor is stopped and no new ones are started.

use super::actor::{self, PollHandle, PollSettings, PollStatus, Subscription};
use super::error::PollError;
use super::events::PollView;
use super::poll::{Poll, VotePolicy};
use super::storage::PollStorage;
use super::tally::VoteOutcome;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Running actors by poll ID
pub(crate) type ActorMap = Mutex<HashMap<String, PollHandle>>;

/// Attempts made when an actor stops between lookup and reply
const MAX_ATTEMPTS: usize = 3;

/// Entry point for all poll operations
#[derive(Debug, Clone)]
pub struct PollRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Debug)]
struct RegistryInner {
    actors: Arc<ActorMap>,
    storage: Arc<dyn PollStorage>,
    settings: PollSettings,
    next_generation: AtomicU64,
    closed: AtomicBool,
}

impl PollRegistry {
    pub fn new(storage: Arc<dyn PollStorage>, settings: PollSettings) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                actors: Arc::new(Mutex::new(HashMap::new())),
                storage,
                settings,
                next_generation: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn settings(&self) -> &PollSettings {
        &self.inner.settings
    }

    /// Handle for `poll_id`, starting its actor if none is running.
    /// Fails with `ActorUnavailable` once the registry is shut down.
    ///
    /// Must be called from within a tokio runtime.
    pub fn handle(&self, poll_id: &str) -> Result<PollHandle, PollError> {
        let mut actors = self.inner.actors.lock();
        // Checked under the lock so shutdown cannot miss a new actor
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(PollError::ActorUnavailable);
        }
        if let Some(handle) = actors.get(poll_id) {
            if !handle.is_closed() {
                return Ok(handle.clone());
            }
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let handle = actor::spawn(
            poll_id,
            generation,
            self.inner.storage.clone(),
            self.inner.settings.clone(),
            Arc::downgrade(&self.inner.actors),
        );
        debug!(poll_id = %poll_id, generation, "poll actor spawned");
        actors.insert(poll_id.to_string(), handle.clone());
        Ok(handle)
    }

    /// Number of running actors
    pub fn active_polls(&self) -> usize {
        self.inner.actors.lock().len()
    }

    /// Create `poll_id`, replacing any existing poll under that ID
    pub async fn create_poll(
        &self,
        poll_id: &str,
        question: &str,
        options: Vec<String>,
        policy: Option<VotePolicy>,
    ) -> Result<Poll, PollError> {
        self.with_actor(poll_id, |handle| {
            let options = options.clone();
            async move { handle.create_or_replace(question, options, policy).await }
        })
        .await
    }

    pub async fn vote(
        &self,
        poll_id: &str,
        option: &str,
        voter_id: &str,
    ) -> Result<VoteOutcome, PollError> {
        self.with_actor(poll_id, |handle| async move {
            handle.vote(option, voter_id).await
        })
        .await
    }

    pub async fn get_poll(&self, poll_id: &str, voter_id: &str) -> Result<PollView, PollError> {
        self.with_actor(poll_id, |handle| async move { handle.get(voter_id).await })
            .await
    }

    pub async fn subscribe(
        &self,
        poll_id: &str,
        voter_id: &str,
    ) -> Result<Subscription, PollError> {
        self.with_actor(poll_id, |handle| async move {
            handle.subscribe(voter_id).await
        })
        .await
    }

    pub async fn status(&self, poll_id: &str) -> Result<PollStatus, PollError> {
        self.with_actor(poll_id, |handle| async move { handle.status().await })
            .await
    }

    /// Stop every actor and refuse further work. Live subscriptions end.
    pub fn shutdown(&self) {
        let drained: Vec<PollHandle> = {
            let mut actors = self.inner.actors.lock();
            self.inner.closed.store(true, Ordering::Release);
            actors.drain().map(|(_, h)| h).collect()
        };
        for handle in &drained {
            handle.stop();
        }
        debug!(actors = drained.len(), "poll registry shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    async fn with_actor<T, F, Fut>(&self, poll_id: &str, op: F) -> Result<T, PollError>
    where
        F: Fn(PollHandle) -> Fut,
        Fut: Future<Output = Result<T, PollError>>,
    {
        for attempt in 1..=MAX_ATTEMPTS {
            let handle = self.handle(poll_id)?;
            let generation = handle.generation();
            match op(handle).await {
                Err(PollError::ActorUnavailable) => {
                    warn!(poll_id = %poll_id, attempt, "poll actor went away, retrying");
                    self.forget(poll_id, generation);
                }
                result => return result,
            }
        }
        Err(PollError::ActorUnavailable)
    }

    fn forget(&self, poll_id: &str, generation: u64) {
        let mut actors = self.inner.actors.lock();
        if actors.get(poll_id).map(PollHandle::generation) == Some(generation) {
            actors.remove(poll_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polls::storage::{FileStorage, MemoryStorage, PollStorage};
    use crate::polls::tally::VoteAction;
    use std::time::Duration;
    use tempfile::TempDir;

    fn labels(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn registry() -> PollRegistry {
        PollRegistry::new(Arc::new(MemoryStorage::new()), PollSettings::default())
    }

    async fn next_event(sub: &mut Subscription) -> serde_json::Value {
        let payload = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("timed out waiting for event")
            .expect("subscription closed");
        serde_json::from_str(&payload).unwrap()
    }

    #[tokio::test]
    async fn test_polls_are_isolated() {
        let registry = registry();
        registry
            .create_poll("a", "A?", labels(&["X", "Y"]), None)
            .await
            .unwrap();
        registry
            .create_poll("b", "B?", labels(&["X", "Y"]), None)
            .await
            .unwrap();

        registry.vote("a", "X", "u1").await.unwrap();
        registry.vote("a", "Y", "u2").await.unwrap();
        registry.vote("b", "X", "u1").await.unwrap();

        let a = registry.get_poll("a", "u1").await.unwrap();
        let b = registry.get_poll("b", "u1").await.unwrap();
        assert_eq!(a.total, 2);
        assert_eq!(b.total, 1);
        assert_eq!(b.votes.get("Y"), Some(0));
        assert_eq!(registry.active_polls(), 2);
    }

    #[tokio::test]
    async fn test_same_handle_reused() {
        let registry = registry();
        let first = registry.handle("p1").unwrap();
        let second = registry.handle("p1").unwrap();
        assert_eq!(first.generation(), second.generation());
        assert_ne!(
            first.generation(),
            registry.handle("p2").unwrap().generation()
        );
    }

    #[tokio::test]
    async fn test_unknown_poll() {
        let registry = registry();
        assert_eq!(
            registry.get_poll("missing", "u1").await.unwrap_err(),
            PollError::PollNotFound
        );
    }

    #[tokio::test]
    async fn test_idle_actor_evicted_and_reloaded() {
        let dir = TempDir::new().unwrap();
        let settings = PollSettings {
            idle_timeout: Some(Duration::from_millis(50)),
            ..PollSettings::default()
        };
        let registry = PollRegistry::new(Arc::new(FileStorage::new(dir.path())), settings);

        registry
            .create_poll("p1", "Color?", labels(&["Red", "Blue"]), None)
            .await
            .unwrap();
        registry.vote("p1", "Red", "u1").await.unwrap();
        let before = registry.handle("p1").unwrap().generation();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(registry.active_polls(), 0);

        let view = registry.get_poll("p1", "u1").await.unwrap();
        assert_eq!(view.total, 1);
        assert_eq!(view.user_votes, labels(&["Red"]));
        assert_ne!(registry.handle("p1").unwrap().generation(), before);

        let outcome = registry.vote("p1", "Blue", "u1").await.unwrap();
        assert_eq!(outcome.action, VoteAction::Switch);
    }

    #[tokio::test]
    async fn test_subscribed_actor_not_evicted() {
        let settings = PollSettings {
            idle_timeout: Some(Duration::from_millis(50)),
            ..PollSettings::default()
        };
        let registry = PollRegistry::new(Arc::new(MemoryStorage::new()), settings);
        registry
            .create_poll("p1", "Color?", labels(&["Red", "Blue"]), None)
            .await
            .unwrap();
        let _sub = registry.subscribe("p1", "viewer").await.unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(registry.active_polls(), 1);
        assert_eq!(registry.status("p1").await.unwrap().subscribers, 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_actors() {
        let storage = Arc::new(MemoryStorage::new());
        let registry = PollRegistry::new(storage.clone(), PollSettings::default());
        registry
            .create_poll("p1", "Color?", labels(&["Red", "Blue"]), None)
            .await
            .unwrap();
        let mut sub = registry.subscribe("p1", "viewer").await.unwrap();
        next_event(&mut sub).await;
        next_event(&mut sub).await;

        registry.shutdown();
        assert!(registry.is_shut_down());
        assert_eq!(registry.active_polls(), 0);

        let ended = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("subscription still open after shutdown");
        assert!(ended.is_none());

        // No second actor is started for the same poll
        assert_eq!(
            registry.vote("p1", "Red", "u1").await.unwrap_err(),
            PollError::ActorUnavailable
        );
        assert_eq!(registry.active_polls(), 0);

        let stored = storage.load("p1").await.unwrap().unwrap();
        assert!(stored.votes.is_empty());
    }

    #[tokio::test]
    async fn test_subscribers_are_isolated() {
        let registry = registry();
        registry
            .create_poll("b", "B?", labels(&["X", "Y"]), None)
            .await
            .unwrap();
        let mut watcher = registry.subscribe("b", "viewer").await.unwrap();
        next_event(&mut watcher).await;
        next_event(&mut watcher).await;

        registry
            .create_poll("a", "A?", labels(&["X", "Y"]), None)
            .await
            .unwrap();
        registry.vote("a", "X", "u1").await.unwrap();
        let _other = registry.subscribe("a", "viewer").await.unwrap();

        let quiet = tokio::time::timeout(Duration::from_millis(200), watcher.recv()).await;
        assert!(quiet.is_err(), "poll b saw an event from poll a");
    }
}
