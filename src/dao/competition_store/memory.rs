use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use dashmap::DashMap;
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::{
    dao::{
        competition_store::CompetitionStore,
        models::{CompetitionEntity, SubmissionEntity},
        storage::{StorageError, StorageResult},
    },
    state::state_machine::CompetitionStatus,
};

/// [`CompetitionStore`] keeping every competition in a concurrent map.
///
/// The store can be switched offline to exercise failure paths.
#[derive(Clone, Default)]
pub struct MemoryCompetitionStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    competitions: DashMap<Uuid, CompetitionEntity>,
    submissions: DashMap<Uuid, Vec<SubmissionEntity>>,
    offline: AtomicBool,
}

impl MemoryCompetitionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail (`true`) or succeed again (`false`).
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of stored competitions.
    pub fn len(&self) -> usize {
        self.inner.competitions.len()
    }

    /// Whether nothing has been stored yet.
    pub fn is_empty(&self) -> bool {
        self.inner.competitions.is_empty()
    }

    fn competitions_where<F>(&self, keep: F) -> Vec<CompetitionEntity>
    where
        F: Fn(&CompetitionEntity) -> bool,
    {
        let mut competitions: Vec<CompetitionEntity> = self
            .inner
            .competitions
            .iter()
            .filter(|entry| keep(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        competitions.sort_by_key(|entity| entity.competition.created_at);
        competitions
    }

    fn ensure_online(&self) -> StorageResult<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable(
                "in-memory store switched offline".into(),
                io::Error::new(io::ErrorKind::NotConnected, "offline"),
            ));
        }
        Ok(())
    }
}

impl CompetitionStore for MemoryCompetitionStore {
    fn save_competition(
        &self,
        competition: CompetitionEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_online()?;
            store
                .inner
                .competitions
                .insert(competition.id(), competition);
            Ok(())
        })
    }

    fn find_competition(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<CompetitionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_online()?;
            Ok(store
                .inner
                .competitions
                .get(&id)
                .map(|entry| entry.value().clone()))
        })
    }

    fn list_competitions(&self) -> BoxFuture<'static, StorageResult<Vec<CompetitionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_online()?;
            Ok(store.competitions_where(|_| true))
        })
    }

    fn list_active_competitions(
        &self,
    ) -> BoxFuture<'static, StorageResult<Vec<CompetitionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_online()?;
            Ok(store.competitions_where(|entity| entity.status == CompetitionStatus::Active))
        })
    }

    fn append_submission(&self, entry: SubmissionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_online()?;
            store
                .inner
                .submissions
                .entry(entry.competition_id)
                .or_default()
                .push(entry);
            Ok(())
        })
    }

    fn list_submissions(
        &self,
        competition_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<SubmissionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_online()?;
            Ok(store
                .inner
                .submissions
                .get(&competition_id)
                .map(|entries| entries.value().clone())
                .unwrap_or_default())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_online() })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_online() })
    }
}
