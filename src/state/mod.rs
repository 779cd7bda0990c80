pub mod competition;
pub mod rooms;
pub mod state_machine;
pub mod transitions;

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, broadcast, watch};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{
    config::AppConfig,
    dao::{
        competition_store::{CompetitionStore, MemoryCompetitionStore},
        models::{CompetitionEntity, SubmissionEntity},
    },
    dto::events::RoomEvent,
    error::ServiceError,
    services::scoring::{SolutionScorer, StubScorer},
    state::competition::{CompetitionId, CompetitionRecord},
};

pub use self::rooms::{RoomHub, RoomRegistry};
pub use self::state_machine::{AbortError, ApplyError, Plan, PlanError, PlanId};
pub use self::transitions::{Gate, Transitioned, run_transition};

/// Handle to the application state shared by handlers and background tasks.
pub type SharedState = Arc<AppState>;

type CompetitionSlot = Arc<Mutex<CompetitionRecord>>;

/// Result of a mutation closure passed to [`AppState::update_competition`].
pub enum Update<T> {
    /// The draft was modified and must be persisted before it replaces the record.
    Changed(T),
    /// Nothing to persist; the record stays as it is.
    Unchanged(T),
}

/// Outcome of [`AppState::update_competition`].
pub struct Committed<T> {
    /// Record as it stands after the call.
    pub record: CompetitionRecord,
    /// Value produced by the mutation closure.
    pub value: T,
    /// Whether a new version was persisted.
    pub changed: bool,
}

/// Central application state: competition registry, rooms and storage handle.
pub struct AppState {
    config: Arc<AppConfig>,
    store: RwLock<Option<Arc<dyn CompetitionStore>>>,
    competitions: DashMap<CompetitionId, CompetitionSlot>,
    rooms: RoomRegistry,
    scorer: Arc<dyn SolutionScorer>,
    degraded: watch::Sender<bool>,
    transition_timeout: Option<Duration>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let scorer = Arc::new(StubScorer::new(config.trust_reported_scores));
        Self::build(config, None, scorer)
    }

    /// Construct a state already backed by the in-memory store.
    pub fn in_memory(config: AppConfig) -> SharedState {
        let scorer = Arc::new(StubScorer::new(config.trust_reported_scores));
        Self::with_scorer(config, scorer)
    }

    /// Construct an in-memory state using a custom scorer.
    pub fn with_scorer(config: AppConfig, scorer: Arc<dyn SolutionScorer>) -> SharedState {
        Self::build(
            config,
            Some(Arc::new(MemoryCompetitionStore::new())),
            scorer,
        )
    }

    /// Construct a state around an explicit store.
    pub fn with_store(config: AppConfig, store: Arc<dyn CompetitionStore>) -> SharedState {
        let scorer = Arc::new(StubScorer::new(config.trust_reported_scores));
        Self::build(config, Some(store), scorer)
    }

    fn build(
        config: AppConfig,
        store: Option<Arc<dyn CompetitionStore>>,
        scorer: Arc<dyn SolutionScorer>,
    ) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(store.is_none());
        let transition_timeout = config.transition_timeout;
        let rooms = RoomRegistry::new(config.room_capacity);
        Arc::new(Self {
            config: Arc::new(config),
            store: RwLock::new(store),
            competitions: DashMap::new(),
            rooms,
            scorer,
            degraded: degraded_tx,
            transition_timeout,
        })
    }

    /// Runtime configuration.
    pub fn config(&self) -> Arc<AppConfig> {
        self.config.clone()
    }

    /// Per-competition broadcast rooms.
    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    /// Collaborator grading submissions.
    pub fn scorer(&self) -> Arc<dyn SolutionScorer> {
        self.scorer.clone()
    }

    /// Obtain a handle to the current store, if one is installed.
    pub async fn store(&self) -> Option<Arc<dyn CompetitionStore>> {
        let guard = self.store.read().await;
        guard.as_ref().cloned()
    }

    /// Obtain the current store or fail with [`ServiceError::Degraded`].
    pub async fn require_store(&self) -> Result<Arc<dyn CompetitionStore>, ServiceError> {
        self.store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new store implementation and leave degraded mode.
    pub async fn install_store(&self, store: Arc<dyn CompetitionStore>) {
        {
            let mut guard = self.store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current store and enter degraded mode.
    pub async fn clear_store(&self) {
        {
            let mut guard = self.store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }

    /// Number of competitions held in memory. Finished ones are not kept.
    pub fn loaded_competitions(&self) -> usize {
        self.competitions.len()
    }

    /// Persist a brand-new competition, then register it.
    pub async fn insert_competition(&self, record: CompetitionRecord) -> Result<(), ServiceError> {
        self.persist(&record).await?;
        self.competitions
            .insert(record.id(), Arc::new(Mutex::new(record)));
        Ok(())
    }

    /// Warm the in-memory map with the competitions the store reports as running.
    pub async fn hydrate_from_store(&self) -> Result<usize, ServiceError> {
        let store = self.require_store().await?;
        let entities = store.list_active_competitions().await?;
        let loaded = entities.len();
        for entity in entities {
            self.register(CompetitionRecord::from(entity));
        }
        Ok(loaded)
    }

    /// Clone of the current record of `id`.
    ///
    /// Finished competitions are served from the store without being cached.
    pub async fn read_competition(&self, id: CompetitionId) -> Result<CompetitionRecord, ServiceError> {
        if let Some(slot) = self.loaded(id) {
            let guard = slot.lock().await;
            return Ok(guard.clone());
        }

        let record = self.load(id).await?;
        if record.status().is_terminal() {
            return Ok(record);
        }
        let slot = self.register(record);
        let guard = slot.lock().await;
        Ok(guard.clone())
    }

    /// Competitions the store reports as running.
    pub async fn active_competitions(&self) -> Result<Vec<CompetitionRecord>, ServiceError> {
        let store = self.require_store().await?;
        let entities = store.list_active_competitions().await?;
        Ok(entities.into_iter().map(CompetitionRecord::from).collect())
    }

    /// Subscribe to the room of `id` and read the competition.
    ///
    /// Finished competitions have no live room: the receiver comes back closed.
    pub async fn join_room(
        &self,
        id: CompetitionId,
    ) -> Result<(broadcast::Receiver<RoomEvent>, CompetitionRecord), ServiceError> {
        let record = self.read_competition(id).await?;
        if record.status().is_terminal() {
            return Ok((RoomRegistry::closed(), record));
        }

        let receiver = self.rooms.subscribe(id);
        // re-read so an end landing between the two calls is not missed
        let record = self.read_competition(id).await?;
        if record.status().is_terminal() {
            self.rooms.close(id);
        }
        Ok((receiver, record))
    }

    /// Append an attempt to the submission log.
    pub async fn log_submission(&self, entry: SubmissionEntity) -> Result<(), ServiceError> {
        let store = self.require_store().await?;
        store.append_submission(entry).await?;
        Ok(())
    }

    /// Every attempt made in competition `id`, oldest first.
    pub async fn submission_log(&self, id: CompetitionId) -> Result<Vec<SubmissionEntity>, ServiceError> {
        let store = self.require_store().await?;
        Ok(store.list_submissions(id).await?)
    }

    /// Every competition known to the store, merged with the in-memory versions.
    pub async fn list_competitions(&self) -> Result<Vec<CompetitionRecord>, ServiceError> {
        let store = self.require_store().await?;
        let entities = store.list_competitions().await?;
        let mut records = Vec::with_capacity(entities.len());
        for entity in entities {
            let id = entity.id();
            let slot = self.competitions.get(&id).map(|entry| entry.value().clone());
            match slot {
                Some(slot) => records.push(slot.lock().await.clone()),
                None => records.push(CompetitionRecord::from(entity)),
            }
        }
        Ok(records)
    }

    /// Serialized read-modify-write of one competition.
    ///
    /// The per-competition lock is held for the whole sequence. `work` mutates a
    /// draft; a [`Update::Changed`] draft is persisted (bounded by the transition
    /// timeout) and only then replaces the record. Any error leaves the record as
    /// it was. A record left completed or cancelled is dropped from memory.
    pub async fn update_competition<T, F>(
        &self,
        id: CompetitionId,
        work: F,
    ) -> Result<Committed<T>, ServiceError>
    where
        F: FnOnce(&mut CompetitionRecord) -> Result<Update<T>, ServiceError>,
    {
        let (slot, mut guard) = loop {
            let slot = self.slot(id).await?;
            let guard = slot.clone().lock_owned().await;
            // an evicted slot may still be waited on; the store has its final state
            if self.is_registered(id, &slot) {
                break (slot, guard);
            }
        };

        let result = self.commit(id, &mut guard, work).await;
        if guard.status().is_terminal() {
            self.competitions
                .remove_if(&id, |_, current| Arc::ptr_eq(current, &slot));
            debug!(competition_id = %id, status = ?guard.status(), "competition evicted from memory");
        }
        result
    }

    async fn commit<T, F>(
        &self,
        id: CompetitionId,
        current: &mut CompetitionRecord,
        work: F,
    ) -> Result<Committed<T>, ServiceError>
    where
        F: FnOnce(&mut CompetitionRecord) -> Result<Update<T>, ServiceError>,
    {
        let mut draft = current.clone();

        match work(&mut draft)? {
            Update::Unchanged(value) => Ok(Committed {
                record: current.clone(),
                value,
                changed: false,
            }),
            Update::Changed(value) => {
                self.persist(&draft).await?;
                *current = draft.clone();
                debug!(
                    competition_id = %id,
                    status = ?draft.status(),
                    version = draft.machine.version(),
                    "competition updated"
                );
                Ok(Committed {
                    record: draft,
                    value,
                    changed: true,
                })
            }
        }
    }

    async fn persist(&self, record: &CompetitionRecord) -> Result<(), ServiceError> {
        let store = self.require_store().await?;
        let entity = CompetitionEntity::from(record);
        let save = store.save_competition(entity);

        let result = match self.transition_timeout {
            Some(limit) => match timeout(limit, save).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(competition_id = %record.id(), "persisting competition timed out");
                    return Err(ServiceError::Timeout);
                }
            },
            None => save.await,
        };

        result.map_err(|err| {
            warn!(competition_id = %record.id(), error = %err, "failed to persist competition");
            ServiceError::from(err)
        })
    }

    fn loaded(&self, id: CompetitionId) -> Option<CompetitionSlot> {
        self.competitions.get(&id).map(|entry| entry.value().clone())
    }

    fn is_registered(&self, id: CompetitionId, slot: &CompetitionSlot) -> bool {
        self.competitions
            .get(&id)
            .is_some_and(|entry| Arc::ptr_eq(entry.value(), slot))
    }

    fn register(&self, record: CompetitionRecord) -> CompetitionSlot {
        self.competitions
            .entry(record.id())
            .or_insert_with(|| Arc::new(Mutex::new(record)))
            .value()
            .clone()
    }

    async fn load(&self, id: CompetitionId) -> Result<CompetitionRecord, ServiceError> {
        let store = self.require_store().await?;
        let entity = store
            .find_competition(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("competition `{id}` not found")))?;
        Ok(CompetitionRecord::from(entity))
    }

    async fn slot(&self, id: CompetitionId) -> Result<CompetitionSlot, ServiceError> {
        if let Some(slot) = self.loaded(id) {
            return Ok(slot);
        }
        let record = self.load(id).await?;
        Ok(self.register(record))
    }
}
