use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::MongoDaoError;
use crate::{
    dao::models::{CompetitionEntity, SubmissionEntity},
    state::{
        competition::{Competition, Submission},
        state_machine::CompetitionStatus,
    },
};

/// Document stored in the `competitions` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoCompetitionDocument {
    #[serde(rename = "_id")]
    id: String,
    status: CompetitionStatus,
    version: i64,
    updated_at: DateTime,
    competition: Competition,
}

impl From<CompetitionEntity> for MongoCompetitionDocument {
    fn from(value: CompetitionEntity) -> Self {
        Self {
            id: value.id().to_string(),
            status: value.status,
            version: i64::try_from(value.version).unwrap_or(i64::MAX),
            updated_at: DateTime::now(),
            competition: value.competition,
        }
    }
}

impl TryFrom<MongoCompetitionDocument> for CompetitionEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoCompetitionDocument) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&value.id).map_err(|err| MongoDaoError::CorruptDocument {
            id: value.id.clone(),
            reason: err.to_string(),
        })?;

        if id != value.competition.id {
            return Err(MongoDaoError::CorruptDocument {
                id: value.id,
                reason: format!("embedded id {} does not match", value.competition.id),
            });
        }

        let version = u64::try_from(value.version).map_err(|_| MongoDaoError::CorruptDocument {
            id: value.id.clone(),
            reason: format!("negative version {}", value.version),
        })?;

        Ok(Self {
            status: value.status,
            version,
            competition: value.competition,
        })
    }
}

/// Document stored in the `submissions` collection, one per attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSubmissionDocument {
    competition_id: String,
    logged_at: DateTime,
    submission: Submission,
}

impl From<SubmissionEntity> for MongoSubmissionDocument {
    fn from(value: SubmissionEntity) -> Self {
        Self {
            competition_id: value.competition_id.to_string(),
            logged_at: DateTime::now(),
            submission: value.submission,
        }
    }
}

impl TryFrom<MongoSubmissionDocument> for SubmissionEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoSubmissionDocument) -> Result<Self, Self::Error> {
        let competition_id =
            Uuid::parse_str(&value.competition_id).map_err(|err| MongoDaoError::CorruptDocument {
                id: value.competition_id.clone(),
                reason: err.to_string(),
            })?;
        Ok(Self {
            competition_id,
            submission: value.submission,
        })
    }
}

/// Filter selecting one competition by `_id`.
pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": id.to_string()}
}

/// Filter selecting the submission log of one competition.
pub fn submissions_of(id: Uuid) -> Document {
    doc! {"competition_id": id.to_string()}
}
