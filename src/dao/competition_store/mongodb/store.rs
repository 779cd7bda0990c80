use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database,
    bson::{Document, doc, serialize_to_bson as to_bson},
    options::IndexOptions,
};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{MongoCompetitionDocument, MongoSubmissionDocument, doc_id, submissions_of},
};
use crate::{
    dao::{
        competition_store::CompetitionStore,
        models::{CompetitionEntity, SubmissionEntity},
        storage::StorageResult,
    },
    state::state_machine::CompetitionStatus,
};

const COMPETITION_COLLECTION_NAME: &str = "competitions";
const SUBMISSION_COLLECTION_NAME: &str = "submissions";

/// MongoDB-backed [`CompetitionStore`].
#[derive(Clone)]
pub struct MongoCompetitionStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    // Kept so the driver's connection pool lives as long as the database handle.
    _client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard._client = client;
        guard.database = database;
        info!("MongoDB connection re-established");
        Ok(())
    }
}

impl MongoCompetitionStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState {
                _client: client,
                database,
            }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let collection = self.collection().await;
        let index = mongodb::IndexModel::builder()
            .keys(doc! {"status": 1, "competition.created_at": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("competition_status_idx".to_owned()))
                    .build(),
            )
            .build();

        collection
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: COMPETITION_COLLECTION_NAME,
                index: "status,competition.created_at",
                source,
            })?;

        let log_index = mongodb::IndexModel::builder()
            .keys(doc! {"competition_id": 1, "logged_at": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("submission_competition_idx".to_owned()))
                    .build(),
            )
            .build();

        self.submissions()
            .await
            .create_index(log_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: SUBMISSION_COLLECTION_NAME,
                index: "competition_id,logged_at",
                source,
            })?;

        Ok(())
    }

    async fn submissions(&self) -> Collection<MongoSubmissionDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoSubmissionDocument>(SUBMISSION_COLLECTION_NAME)
    }

    async fn collection(&self) -> Collection<MongoCompetitionDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoCompetitionDocument>(COMPETITION_COLLECTION_NAME)
    }

    async fn save(&self, competition: CompetitionEntity) -> MongoResult<()> {
        let id = competition.id();
        let document: MongoCompetitionDocument = competition.into();
        let collection = self.collection().await;

        collection
            .replace_one(doc_id(id), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveCompetition { id, source })?;

        Ok(())
    }

    async fn find(&self, id: Uuid) -> MongoResult<Option<CompetitionEntity>> {
        let collection = self.collection().await;

        let document = collection
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::LoadCompetition { id, source })?;

        document.map(CompetitionEntity::try_from).transpose()
    }

    async fn list(&self, filter: Document) -> MongoResult<Vec<CompetitionEntity>> {
        let collection = self.collection().await;

        let documents: Vec<MongoCompetitionDocument> = collection
            .find(filter)
            .sort(doc! {"competition.created_at": 1})
            .await
            .map_err(|source| MongoDaoError::ListCompetitions { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListCompetitions { source })?;

        documents
            .into_iter()
            .map(CompetitionEntity::try_from)
            .collect()
    }

    async fn list_active(&self) -> MongoResult<Vec<CompetitionEntity>> {
        let status = to_bson(&CompetitionStatus::Active).map_err(|err| MongoDaoError::Encode {
            reason: err.to_string(),
        })?;
        self.list(doc! {"status": status}).await
    }

    async fn append(&self, entry: SubmissionEntity) -> MongoResult<()> {
        let id = entry.competition_id;
        let document: MongoSubmissionDocument = entry.into();
        self.submissions()
            .await
            .insert_one(&document)
            .await
            .map_err(|source| MongoDaoError::AppendSubmission { id, source })?;
        Ok(())
    }

    async fn submission_log(&self, id: Uuid) -> MongoResult<Vec<SubmissionEntity>> {
        let documents: Vec<MongoSubmissionDocument> = self
            .submissions()
            .await
            .find(submissions_of(id))
            .sort(doc! {"logged_at": 1})
            .await
            .map_err(|source| MongoDaoError::ListSubmissions { id, source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListSubmissions { id, source })?;

        documents
            .into_iter()
            .map(SubmissionEntity::try_from)
            .collect()
    }
}

impl CompetitionStore for MongoCompetitionStore {
    fn save_competition(
        &self,
        competition: CompetitionEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save(competition).await.map_err(Into::into) })
    }

    fn find_competition(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<CompetitionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find(id).await.map_err(Into::into) })
    }

    fn list_competitions(&self) -> BoxFuture<'static, StorageResult<Vec<CompetitionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list(doc! {}).await.map_err(Into::into) })
    }

    fn list_active_competitions(
        &self,
    ) -> BoxFuture<'static, StorageResult<Vec<CompetitionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_active().await.map_err(Into::into) })
    }

    fn append_submission(&self, entry: SubmissionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.append(entry).await.map_err(Into::into) })
    }

    fn list_submissions(
        &self,
        competition_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<SubmissionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.submission_log(competition_id).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
