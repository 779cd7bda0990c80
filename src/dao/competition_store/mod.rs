/// In-process backend used when no database is configured.
pub mod memory;
#[cfg(feature = "mongo-store")]
/// MongoDB backend.
pub mod mongodb;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::{
    models::{CompetitionEntity, SubmissionEntity},
    storage::StorageResult,
};

pub use memory::MemoryCompetitionStore;

/// Abstraction over the persistence layer for competitions.
pub trait CompetitionStore: Send + Sync {
    /// Insert or replace a competition.
    fn save_competition(
        &self,
        competition: CompetitionEntity,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Load a competition by id.
    fn find_competition(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<CompetitionEntity>>>;
    /// Load every stored competition, tombstones included.
    fn list_competitions(&self) -> BoxFuture<'static, StorageResult<Vec<CompetitionEntity>>>;
    /// Load only the competitions currently running.
    fn list_active_competitions(
        &self,
    ) -> BoxFuture<'static, StorageResult<Vec<CompetitionEntity>>>;
    /// Append one attempt to the submission log.
    fn append_submission(&self, entry: SubmissionEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Submission log of one competition, oldest first.
    fn list_submissions(
        &self,
        competition_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<SubmissionEntity>>>;
    /// Cheap liveness check.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Re-establish the backend connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
