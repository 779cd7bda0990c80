use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::{
    competition::{Competition, CompetitionId, CompetitionRecord, Submission},
    state_machine::{CompetitionStateMachine, CompetitionStatus},
};

/// Persisted form of a competition: its data plus the lifecycle status and
/// version owned by the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompetitionEntity {
    /// Lifecycle status at save time.
    pub status: CompetitionStatus,
    /// Number of transitions applied.
    pub version: u64,
    /// Competition data.
    pub competition: Competition,
}

impl CompetitionEntity {
    /// Identifier of the stored competition.
    pub fn id(&self) -> Uuid {
        self.competition.id
    }
}

impl From<&CompetitionRecord> for CompetitionEntity {
    fn from(record: &CompetitionRecord) -> Self {
        Self {
            status: record.machine.status(),
            version: record.machine.version(),
            competition: record.competition.clone(),
        }
    }
}

impl From<CompetitionEntity> for CompetitionRecord {
    fn from(entity: CompetitionEntity) -> Self {
        Self {
            machine: CompetitionStateMachine::restore(entity.status, entity.version),
            competition: entity.competition,
        }
    }
}

/// One entry of the append-only submission log, stored apart from the
/// competition so the competition document stays small.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionEntity {
    /// Competition the attempt was made in.
    pub competition_id: CompetitionId,
    /// The attempt, code included.
    pub submission: Submission,
}
