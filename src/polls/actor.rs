//! Poll Actor
//!
//! One tokio task per poll ID owns that poll's definition, tally and
//! subscription hub. Commands arrive over a bounded queue and are handled
//! one at a time, including the storage write each mutation awaits, so
//! operations on one poll never interleave while different polls run
//! independently.

use super::error::PollError;
use super::events::{PollEvent, PollView};
use super::hub::{Payload, SessionId, SubscriptionHub};
use super::poll::{Poll, VotePolicy, DEFAULT_MAX_OPTIONS};
use super::registry::ActorMap;
use super::storage::{PollRecord, PollStorage};
use super::tally::{TallyStore, VoteOutcome};
use futures_util::Stream;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll as TaskPoll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

/// How often an actor checks for dead sessions and idleness
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Tunables shared by every poll actor
#[derive(Debug, Clone)]
pub struct PollSettings {
    /// Policy for polls created without one
    pub default_policy: VotePolicy,
    pub max_options: usize,
    /// Pending commands per actor
    pub command_queue_size: usize,
    /// Pending events per viewer session
    pub subscriber_queue_size: usize,
    /// Stop actors with no viewers after this long without commands
    pub idle_timeout: Option<Duration>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            default_policy: VotePolicy::Single,
            max_options: DEFAULT_MAX_OPTIONS,
            command_queue_size: 64,
            subscriber_queue_size: 256,
            idle_timeout: Some(Duration::from_secs(300)),
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T, PollError>>;

/// Summary of an actor's state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollStatus {
    pub poll_id: String,
    pub initialized: bool,
    pub subscribers: usize,
    pub voters: usize,
    pub total: u64,
}

enum Command {
    Create {
        question: String,
        options: Vec<String>,
        policy: Option<VotePolicy>,
        reply: Reply<Poll>,
    },
    Vote {
        option: String,
        voter_id: String,
        reply: Reply<VoteOutcome>,
    },
    Get {
        voter_id: String,
        reply: Reply<PollView>,
    },
    Subscribe {
        voter_id: String,
        reply: Reply<(SessionId, mpsc::Receiver<Payload>)>,
    },
    Unsubscribe {
        session_id: SessionId,
    },
    Status {
        reply: Reply<PollStatus>,
    },
}

impl Command {
    fn reject(self, err: PollError) {
        match self {
            Command::Create { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Command::Vote { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Command::Get { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Command::Subscribe { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Command::Status { reply } => {
                let _ = reply.send(Err(err));
            }
            Command::Unsubscribe { .. } => {}
        }
    }
}

/// Cheap, cloneable address of one poll actor
#[derive(Debug, Clone)]
pub struct PollHandle {
    poll_id: Arc<str>,
    generation: u64,
    tx: mpsc::Sender<Command>,
    stop: CancellationToken,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::Create { .. } => "Create",
            Command::Vote { .. } => "Vote",
            Command::Get { .. } => "Get",
            Command::Subscribe { .. } => "Subscribe",
            Command::Unsubscribe { .. } => "Unsubscribe",
            Command::Status { .. } => "Status",
        };
        f.write_str(name)
    }
}

impl PollHandle {
    pub fn poll_id(&self) -> &str {
        &self.poll_id
    }

    /// Distinguishes successive actors for the same poll ID
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the actor has stopped accepting commands
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Stop the actor: queued commands fail with `ActorUnavailable` and
    /// every subscription ends.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, PollError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| PollError::ActorUnavailable)?;
        rx.await.map_err(|_| PollError::ActorUnavailable)?
    }

    /// Create the poll, replacing any existing poll with this ID
    pub async fn create_or_replace(
        &self,
        question: impl Into<String>,
        options: Vec<String>,
        policy: Option<VotePolicy>,
    ) -> Result<Poll, PollError> {
        let question = question.into();
        self.request(|reply| Command::Create {
            question,
            options,
            policy,
            reply,
        })
        .await
    }

    /// Toggle `voter_id`'s vote for `option`
    pub async fn vote(&self, option: &str, voter_id: &str) -> Result<VoteOutcome, PollError> {
        self.request(|reply| Command::Vote {
            option: option.to_string(),
            voter_id: voter_id.to_string(),
            reply,
        })
        .await
    }

    /// Full state as seen by `voter_id`
    pub async fn get(&self, voter_id: &str) -> Result<PollView, PollError> {
        self.request(|reply| Command::Get {
            voter_id: voter_id.to_string(),
            reply,
        })
        .await
    }

    /// Register a live session. The first item is always a `poll_data`
    /// event for the current state.
    pub async fn subscribe(&self, voter_id: &str) -> Result<Subscription, PollError> {
        let (session_id, rx) = self
            .request(|reply| Command::Subscribe {
                voter_id: voter_id.to_string(),
                reply,
            })
            .await?;
        Ok(Subscription {
            poll_id: self.poll_id.clone(),
            session_id,
            voter_id: voter_id.to_string(),
            rx,
            commands: self.tx.clone(),
        })
    }

    pub async fn status(&self) -> Result<PollStatus, PollError> {
        self.request(|reply| Command::Status { reply }).await
    }
}

/// Stream of encoded events for one live session.
///
/// Dropping the subscription unregisters the session.
#[derive(Debug)]
pub struct Subscription {
    poll_id: Arc<str>,
    session_id: SessionId,
    voter_id: String,
    rx: mpsc::Receiver<Payload>,
    commands: mpsc::Sender<Command>,
}

impl Subscription {
    pub fn poll_id(&self) -> &str {
        &self.poll_id
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn voter_id(&self) -> &str {
        &self.voter_id
    }

    /// Next event, or `None` once the hub has dropped this session
    pub async fn recv(&mut self) -> Option<Payload> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = Payload;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> TaskPoll<Option<Payload>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // A full queue leaves the session to the periodic sweep
        let _ = self.commands.try_send(Command::Unsubscribe {
            session_id: self.session_id,
        });
    }
}

/// Start an actor for `poll_id` and return its handle
pub(super) fn spawn(
    poll_id: &str,
    generation: u64,
    storage: Arc<dyn PollStorage>,
    settings: PollSettings,
    registry: Weak<ActorMap>,
) -> PollHandle {
    let (tx, rx) = mpsc::channel(settings.command_queue_size.max(1));
    let stop = CancellationToken::new();
    let actor = PollActor {
        poll_id: poll_id.to_string(),
        generation,
        poll: None,
        store: TallyStore::new(),
        hub: SubscriptionHub::new(poll_id, settings.subscriber_queue_size),
        loaded: false,
        storage,
        settings,
        registry,
        stop: stop.clone(),
    };
    let span = tracing::info_span!("poll_actor", poll_id = %poll_id, generation);
    tokio::spawn(actor.run(rx).instrument(span));

    PollHandle {
        poll_id: Arc::from(poll_id),
        generation,
        tx,
        stop,
    }
}

fn close_queue(rx: &mut mpsc::Receiver<Command>) {
    rx.close();
    while let Ok(command) = rx.try_recv() {
        command.reject(PollError::ActorUnavailable);
    }
}

struct PollActor {
    poll_id: String,
    generation: u64,
    poll: Option<Poll>,
    store: TallyStore,
    hub: SubscriptionHub,
    /// Whether persisted state has been read
    loaded: bool,
    storage: Arc<dyn PollStorage>,
    settings: PollSettings,
    registry: Weak<ActorMap>,
    stop: CancellationToken,
}

impl PollActor {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        debug!("poll actor started");
        if let Err(err) = self.ensure_loaded().await {
            warn!(error = %err, "initial load failed, will retry on next command");
        }

        let sweep_every = self
            .settings
            .idle_timeout
            .map(|idle| idle.min(SWEEP_INTERVAL))
            .unwrap_or(SWEEP_INTERVAL);
        let mut sweep = tokio::time::interval(sweep_every);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        sweep.tick().await;
        let mut last_activity = Instant::now();
        let stop = self.stop.clone();

        loop {
            tokio::select! {
                biased;

                _ = stop.cancelled() => {
                    close_queue(&mut rx);
                    info!(subscribers = self.hub.len(), "poll actor stopped by registry");
                    break;
                }
                command = rx.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    last_activity = Instant::now();
                    self.handle(command).await;
                }
                _ = sweep.tick() => {
                    self.hub.prune_closed();
                    if let Some(idle) = self.settings.idle_timeout {
                        if self.hub.is_empty() && last_activity.elapsed() >= idle {
                            self.evict(&mut rx);
                            break;
                        }
                    }
                }
            }
        }
        debug!("poll actor stopped");
    }

    /// Leave the registry and refuse anything still queued; callers retry
    /// against a fresh actor, which reloads the persisted state.
    fn evict(&mut self, rx: &mut mpsc::Receiver<Command>) {
        if let Some(actors) = self.registry.upgrade() {
            let mut actors = actors.lock();
            if actors.get(&self.poll_id).map(PollHandle::generation) == Some(self.generation) {
                actors.remove(&self.poll_id);
            }
        }
        close_queue(rx);
        info!("idle poll actor evicted");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Create {
                question,
                options,
                policy,
                reply,
            } => {
                let _ = reply.send(self.create(question, options, policy).await);
            }
            Command::Vote {
                option,
                voter_id,
                reply,
            } => {
                let _ = reply.send(self.vote(&option, &voter_id).await);
            }
            Command::Get { voter_id, reply } => {
                let _ = reply.send(self.get(&voter_id).await);
            }
            Command::Subscribe { voter_id, reply } => {
                let _ = reply.send(self.subscribe(&voter_id).await);
            }
            Command::Unsubscribe { session_id } => {
                self.hub.unregister(session_id);
            }
            Command::Status { reply } => {
                let _ = reply.send(Ok(self.status()));
            }
        }
    }

    async fn ensure_loaded(&mut self) -> Result<(), PollError> {
        if self.loaded {
            return Ok(());
        }
        match self.storage.load(&self.poll_id).await {
            Ok(Some(record)) => {
                let (store, repaired) = TallyStore::restore(
                    &record.poll.options,
                    record.poll.policy,
                    Some(&record.tally),
                    record.votes,
                )
                .map_err(|err| PollError::Storage(format!("corrupt poll record: {}", err)))?;
                if repaired {
                    warn!("persisted tally disagreed with selections, rebuilt from selections");
                }
                debug!(total = store.total(), voters = store.voter_count(), "loaded poll");
                self.poll = Some(record.poll);
                self.store = store;
            }
            Ok(None) => {}
            Err(err) => {
                error!(error = %err, "failed to load poll");
                return Err(err.into());
            }
        }
        self.loaded = true;
        Ok(())
    }

    async fn persist(&self, poll: &Poll, store: &TallyStore) -> Result<(), PollError> {
        let (tally, votes) = store.snapshot()?;
        let record = PollRecord {
            poll: poll.clone(),
            tally,
            votes,
        };
        self.storage
            .save(&self.poll_id, &record)
            .await
            .map_err(|err| {
                error!(error = %err, "failed to persist poll");
                PollError::from(err)
            })
    }

    async fn create(
        &mut self,
        question: String,
        options: Vec<String>,
        policy: Option<VotePolicy>,
    ) -> Result<Poll, PollError> {
        let poll = Poll::new(self.poll_id.clone(), question, options)
            .with_policy(policy.unwrap_or(self.settings.default_policy));
        poll.validate(self.settings.max_options)
            .map_err(PollError::InvalidPoll)?;

        let mut store = TallyStore::new();
        store.initialize(&poll.options, poll.policy)?;
        self.persist(&poll, &store).await?;

        let replaced = self.poll.is_some();
        self.poll = Some(poll.clone());
        self.store = store;
        self.loaded = true;
        info!(
            options = poll.options.len(),
            policy = %poll.policy,
            replaced,
            "poll created"
        );

        let votes = self.store.tally().cloned().unwrap_or_default();
        self.hub
            .broadcast(&PollEvent::full_state(&poll, &votes, Vec::new()));
        Ok(poll)
    }

    async fn vote(&mut self, option: &str, voter_id: &str) -> Result<VoteOutcome, PollError> {
        self.ensure_loaded().await?;
        let poll = self.poll.as_ref().ok_or(PollError::PollNotFound)?;

        // Mutate a copy; commit only once it is durable
        let mut next = self.store.clone();
        let outcome = next.apply_vote(option, voter_id)?;
        self.persist(poll, &next).await?;
        self.store = next;
        debug_assert!(self.store.is_consistent());

        debug!(
            voter_id = %voter_id,
            option = %option,
            action = outcome.action.as_str(),
            total = outcome.total,
            "vote applied"
        );
        self.hub.broadcast(&PollEvent::from(&outcome));
        Ok(outcome)
    }

    async fn get(&mut self, voter_id: &str) -> Result<PollView, PollError> {
        self.ensure_loaded().await?;
        let poll = self.poll.as_ref().ok_or(PollError::PollNotFound)?;
        let votes = self.store.tally().cloned().ok_or(PollError::PollNotFound)?;
        Ok(PollView {
            poll: poll.clone(),
            total: votes.total(),
            votes,
            user_votes: self.store.selection(voter_id),
            voter_id: voter_id.to_string(),
        })
    }

    async fn subscribe(
        &mut self,
        voter_id: &str,
    ) -> Result<(SessionId, mpsc::Receiver<Payload>), PollError> {
        self.ensure_loaded().await?;
        let poll = self.poll.as_ref().ok_or(PollError::PollNotFound)?;
        let votes = self.store.tally().ok_or(PollError::PollNotFound)?;
        let initial = PollEvent::full_state(poll, votes, self.store.selection(voter_id));
        Ok(self.hub.register(voter_id, &initial))
    }

    fn status(&self) -> PollStatus {
        PollStatus {
            poll_id: self.poll_id.clone(),
            initialized: self.poll.is_some(),
            subscribers: self.hub.len(),
            voters: self.store.voter_count(),
            total: self.store.total(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polls::storage::{MemoryStorage, StorageError};
    use crate::polls::tally::VoteAction;
    use async_trait::async_trait;
    use futures_util::StreamExt;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Memory storage whose writes can be made to fail
    #[derive(Debug, Default)]
    struct FlakyStorage {
        inner: MemoryStorage,
        fail_writes: AtomicBool,
    }

    #[async_trait]
    impl PollStorage for FlakyStorage {
        async fn load(&self, poll_id: &str) -> Result<Option<PollRecord>, StorageError> {
            self.inner.load(poll_id).await
        }

        async fn save(&self, poll_id: &str, record: &PollRecord) -> Result<(), StorageError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StorageError::Io(std::io::Error::other("disk full")));
            }
            self.inner.save(poll_id, record).await
        }
    }

    fn labels(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn start(storage: Arc<dyn PollStorage>, settings: PollSettings) -> PollHandle {
        let registry: Arc<ActorMap> = Arc::new(Mutex::new(HashMap::new()));
        spawn("p1", 1, storage, settings, Arc::downgrade(&registry))
    }

    fn memory_actor() -> PollHandle {
        start(Arc::new(MemoryStorage::new()), PollSettings::default())
    }

    async fn next_event(sub: &mut Subscription) -> serde_json::Value {
        let payload = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("timed out waiting for event")
            .expect("subscription closed");
        serde_json::from_str(&payload).unwrap()
    }

    #[tokio::test]
    async fn test_single_policy_scenario() {
        let handle = memory_actor();
        handle
            .create_or_replace("Color?", labels(&["Red", "Blue"]), Some(VotePolicy::Single))
            .await
            .unwrap();

        let outcome = handle.vote("Red", "u1").await.unwrap();
        assert_eq!(outcome.action, VoteAction::Vote);
        assert_eq!(outcome.total, 1);
        assert_eq!(outcome.tally.get("Red"), Some(1));
        assert_eq!(outcome.tally.get("Blue"), Some(0));

        let outcome = handle.vote("Blue", "u1").await.unwrap();
        assert_eq!(outcome.action, VoteAction::Switch);
        assert_eq!(outcome.total, 1);
        assert_eq!(outcome.tally.get("Red"), Some(0));
        assert_eq!(outcome.tally.get("Blue"), Some(1));

        let outcome = handle.vote("Blue", "u1").await.unwrap();
        assert_eq!(outcome.action, VoteAction::Unvote);
        assert_eq!(outcome.total, 0);
    }

    #[tokio::test]
    async fn test_multiple_policy_scenario() {
        let handle = memory_actor();
        handle
            .create_or_replace("Color?", labels(&["Red", "Blue"]), Some(VotePolicy::Multiple))
            .await
            .unwrap();

        let outcome = handle.vote("Red", "u1").await.unwrap();
        assert_eq!((outcome.action, outcome.total), (VoteAction::Vote, 1));
        let outcome = handle.vote("Blue", "u1").await.unwrap();
        assert_eq!((outcome.action, outcome.total), (VoteAction::Vote, 2));
        let outcome = handle.vote("Red", "u1").await.unwrap();
        assert_eq!((outcome.action, outcome.total), (VoteAction::Unvote, 1));
        assert_eq!(outcome.selection, labels(&["Blue"]));
    }

    #[tokio::test]
    async fn test_default_policy_from_settings() {
        let settings = PollSettings {
            default_policy: VotePolicy::Multiple,
            ..PollSettings::default()
        };
        let handle = start(Arc::new(MemoryStorage::new()), settings);
        let poll = handle
            .create_or_replace("Q?", labels(&["A", "B"]), None)
            .await
            .unwrap();
        assert_eq!(poll.policy, VotePolicy::Multiple);
    }

    #[tokio::test]
    async fn test_operations_before_create() {
        let handle = memory_actor();
        assert_eq!(handle.get("u1").await.unwrap_err(), PollError::PollNotFound);
        assert_eq!(
            handle.vote("Red", "u1").await.unwrap_err(),
            PollError::PollNotFound
        );
        assert_eq!(
            handle.subscribe("u1").await.unwrap_err(),
            PollError::PollNotFound
        );
    }

    #[tokio::test]
    async fn test_invalid_create_keeps_existing_poll() {
        let handle = memory_actor();
        handle
            .create_or_replace("Color?", labels(&["Red", "Blue"]), None)
            .await
            .unwrap();
        handle.vote("Red", "u1").await.unwrap();

        let err = handle
            .create_or_replace("Color?", labels(&["Red", "Red"]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::InvalidPoll(_)));

        let view = handle.get("u1").await.unwrap();
        assert_eq!(view.total, 1);
        assert_eq!(view.user_votes, labels(&["Red"]));
    }

    #[tokio::test]
    async fn test_unknown_option_rejected() {
        let handle = memory_actor();
        handle
            .create_or_replace("Color?", labels(&["Red", "Blue"]), None)
            .await
            .unwrap();
        handle.vote("Red", "u1").await.unwrap();

        assert_eq!(
            handle.vote("Green", "u1").await.unwrap_err(),
            PollError::UnknownOption("Green".to_string())
        );
        let view = handle.get("u1").await.unwrap();
        assert_eq!(view.total, 1);
        assert_eq!(view.user_votes, labels(&["Red"]));
    }

    #[tokio::test]
    async fn test_get_reports_voter_selection() {
        let handle = memory_actor();
        handle
            .create_or_replace("Color?", labels(&["Red", "Blue"]), None)
            .await
            .unwrap();
        handle.vote("Blue", "u1").await.unwrap();

        let view = handle.get("u1").await.unwrap();
        assert_eq!(view.poll.question, "Color?");
        assert_eq!(view.poll.options, labels(&["Red", "Blue"]));
        assert_eq!(view.user_votes, labels(&["Blue"]));
        assert_eq!(view.voter_id, "u1");

        let other = handle.get("u2").await.unwrap();
        assert!(other.user_votes.is_empty());
        assert_eq!(other.total, 1);
    }

    #[tokio::test]
    async fn test_subscriber_replay_then_deltas() {
        let handle = memory_actor();
        handle
            .create_or_replace("Color?", labels(&["Red", "Blue"]), None)
            .await
            .unwrap();
        handle.vote("Red", "u1").await.unwrap();
        handle.vote("Red", "u2").await.unwrap();
        handle.vote("Blue", "u3").await.unwrap();

        let mut sub = handle.subscribe("u2").await.unwrap();
        let initial = next_event(&mut sub).await;
        assert_eq!(initial["type"], "poll_data");
        assert_eq!(initial["total"], 3);
        assert_eq!(initial["votes"]["Red"], 2);
        assert_eq!(initial["votes"]["Blue"], 1);
        assert_eq!(initial["userVotes"], serde_json::json!(["Red"]));

        let count = next_event(&mut sub).await;
        assert_eq!(count["type"], "user_count");
        assert_eq!(count["count"], 1);

        handle.vote("Blue", "u1").await.unwrap();
        let delta = next_event(&mut sub).await;
        assert_eq!(delta["type"], "vote_update");
        assert_eq!(delta["action"], "switch");
        assert_eq!(delta["voterId"], "u1");
        assert_eq!(delta["total"], 3);
        assert_eq!(delta["votes"]["Red"], 1);
        assert_eq!(delta["votes"]["Blue"], 2);
    }

    #[tokio::test]
    async fn test_deltas_arrive_in_mutation_order() {
        let handle = memory_actor();
        handle
            .create_or_replace("Color?", labels(&["Red", "Blue"]), None)
            .await
            .unwrap();
        let mut sub = handle.subscribe("viewer").await.unwrap();
        next_event(&mut sub).await;
        next_event(&mut sub).await;

        let mut expected = Vec::new();
        for i in 0..20 {
            let outcome = handle.vote("Red", &format!("u{}", i % 3)).await.unwrap();
            expected.push(outcome.total);
        }
        for total in expected {
            let event = next_event(&mut sub).await;
            assert_eq!(event["total"], total);
        }
    }

    #[tokio::test]
    async fn test_recreate_resets_and_notifies_subscribers() {
        let handle = memory_actor();
        handle
            .create_or_replace("Color?", labels(&["Red", "Blue"]), None)
            .await
            .unwrap();
        handle.vote("Red", "u1").await.unwrap();

        let mut sub = handle.subscribe("u1").await.unwrap();
        next_event(&mut sub).await;
        next_event(&mut sub).await;

        handle
            .create_or_replace("Pet?", labels(&["Cat", "Dog", "Fish"]), None)
            .await
            .unwrap();
        let fresh = next_event(&mut sub).await;
        assert_eq!(fresh["type"], "poll_data");
        assert_eq!(fresh["poll"]["question"], "Pet?");
        assert_eq!(fresh["total"], 0);
        assert_eq!(fresh["votes"], serde_json::json!({"Cat": 0, "Dog": 0, "Fish": 0}));
        assert_eq!(fresh["userVotes"], serde_json::json!([]));

        let view = handle.get("u1").await.unwrap();
        assert!(view.user_votes.is_empty());
        assert_eq!(view.total, 0);
    }

    #[tokio::test]
    async fn test_dropped_subscription_unregisters() {
        let handle = memory_actor();
        handle
            .create_or_replace("Color?", labels(&["Red", "Blue"]), None)
            .await
            .unwrap();

        let mut watcher = handle.subscribe("a").await.unwrap();
        next_event(&mut watcher).await;
        next_event(&mut watcher).await;

        let other = handle.subscribe("b").await.unwrap();
        assert_eq!(next_event(&mut watcher).await["count"], 2);
        assert_eq!(handle.status().await.unwrap().subscribers, 2);

        drop(other);
        assert_eq!(next_event(&mut watcher).await["count"], 1);
        assert_eq!(handle.status().await.unwrap().subscribers, 1);
    }

    #[tokio::test]
    async fn test_stop_ends_subscriptions_and_refuses_commands() {
        let handle = memory_actor();
        handle
            .create_or_replace("Color?", labels(&["Red", "Blue"]), None)
            .await
            .unwrap();
        let mut sub = handle.subscribe("a").await.unwrap();
        next_event(&mut sub).await;
        next_event(&mut sub).await;

        handle.stop();
        let ended = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("subscription still open after stop");
        assert!(ended.is_none());
        assert_eq!(
            handle.vote("Red", "u1").await.unwrap_err(),
            PollError::ActorUnavailable
        );
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_subscription_is_a_stream() {
        let handle = memory_actor();
        handle
            .create_or_replace("Color?", labels(&["Red", "Blue"]), None)
            .await
            .unwrap();
        let sub = handle.subscribe("u1").await.unwrap();
        assert_eq!(sub.poll_id(), "p1");
        assert_eq!(sub.voter_id(), "u1");

        let events: Vec<Payload> = sub.take(2).collect().await;
        assert!(events[0].contains("\"poll_data\""));
        assert!(events[1].contains("\"user_count\""));
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_state_unchanged() {
        let storage = Arc::new(FlakyStorage::default());
        let handle = start(storage.clone(), PollSettings::default());
        handle
            .create_or_replace("Color?", labels(&["Red", "Blue"]), None)
            .await
            .unwrap();
        handle.vote("Red", "u1").await.unwrap();
        let mut sub = handle.subscribe("viewer").await.unwrap();
        next_event(&mut sub).await;
        next_event(&mut sub).await;

        storage.fail_writes.store(true, Ordering::SeqCst);
        let err = handle.vote("Blue", "u1").await.unwrap_err();
        assert!(matches!(err, PollError::Storage(_)));
        let err = handle
            .create_or_replace("Other?", labels(&["X", "Y"]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::Storage(_)));

        let view = handle.get("u1").await.unwrap();
        assert_eq!(view.poll.question, "Color?");
        assert_eq!(view.user_votes, labels(&["Red"]));
        assert_eq!(view.total, 1);
        // Nothing was broadcast for the failed operations
        assert!(sub.rx.try_recv().is_err());

        storage.fail_writes.store(false, Ordering::SeqCst);
        let outcome = handle.vote("Blue", "u1").await.unwrap();
        assert_eq!(outcome.action, VoteAction::Switch);
    }

    #[tokio::test]
    async fn test_state_survives_actor_restart() {
        let storage: Arc<dyn PollStorage> = Arc::new(MemoryStorage::new());
        let first = start(storage.clone(), PollSettings::default());
        first
            .create_or_replace("Color?", labels(&["Red", "Blue"]), Some(VotePolicy::Multiple))
            .await
            .unwrap();
        first.vote("Red", "u1").await.unwrap();
        first.vote("Blue", "u1").await.unwrap();
        drop(first);

        let second = start(storage, PollSettings::default());
        let view = second.get("u1").await.unwrap();
        assert_eq!(view.total, 2);
        assert_eq!(view.poll.policy, VotePolicy::Multiple);
        assert_eq!(view.user_votes, labels(&["Red", "Blue"]));

        let outcome = second.vote("Red", "u1").await.unwrap();
        assert_eq!(outcome.action, VoteAction::Unvote);
    }

    #[tokio::test]
    async fn test_concurrent_votes_stay_consistent() {
        let handle = memory_actor();
        handle
            .create_or_replace("Color?", labels(&["Red", "Blue"]), None)
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for i in 0..50 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                let option = if i % 2 == 0 { "Red" } else { "Blue" };
                handle.vote(option, &format!("u{}", i)).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let status = handle.status().await.unwrap();
        assert_eq!(status.total, 50);
        assert_eq!(status.voters, 50);
        let view = handle.get("x").await.unwrap();
        assert_eq!(view.votes.get("Red"), Some(25));
        assert_eq!(view.votes.get("Blue"), Some(25));
    }
}
