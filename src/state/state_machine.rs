use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle status of a competition. Exactly one holds at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CompetitionStatus {
    /// Created and accepting participants.
    Pending,
    /// Started; the countdown is running and submissions count.
    Active,
    /// Ended; the winner is frozen.
    Completed,
    /// Deleted by the creator. Terminal.
    Cancelled,
}

impl CompetitionStatus {
    /// Whether no further lifecycle event except deletion can apply.
    pub fn is_terminal(self) -> bool {
        matches!(self, CompetitionStatus::Completed | CompetitionStatus::Cancelled)
    }
}

/// Why an `end` was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum EndTrigger {
    /// A participant's countdown (or the server sweeper) reached zero.
    Deadline,
    /// The creator stopped the competition by hand.
    CreatorManual,
    /// Every remaining participant has submitted.
    AllSubmitted,
}

/// Events that can be applied to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompetitionEvent {
    /// Creator starts the competition.
    Start,
    /// Competition ends for the given reason.
    End(EndTrigger),
    /// Creator deletes the competition.
    Cancel,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while {from:?}")]
pub struct InvalidTransition {
    /// The status the competition was in when the invalid event was received.
    pub from: CompetitionStatus,
    /// The event that cannot be applied from this status.
    pub event: CompetitionEvent,
}

/// Errors that can occur when planning a state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A transition is already pending and must be applied or aborted.
    AlreadyPending,
    /// The requested transition is not valid from the current status.
    InvalidTransition(InvalidTransition),
}

/// Errors that can occur when applying a planned state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
    /// Status changed since the plan was created.
    StatusMismatch {
        /// Status when plan was created.
        expected: CompetitionStatus,
        /// Current status.
        actual: CompetitionStatus,
    },
    /// Version changed since the plan was created.
    VersionMismatch {
        /// Version when plan was created.
        expected: u64,
        /// Current version.
        actual: u64,
    },
}

/// Errors that can occur when aborting a planned state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
}

/// Unique identifier for a planned state transition.
pub type PlanId = Uuid;

/// A planned state machine transition that has been validated but not yet applied.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Unique identifier for this plan.
    pub id: PlanId,
    /// Status the competition is currently in.
    pub from: CompetitionStatus,
    /// Status the competition will transition to.
    pub to: CompetitionStatus,
    /// Event that triggered this transition.
    pub event: CompetitionEvent,
    /// Version number after applying this transition.
    pub version_next: u64,
    /// Timestamp when this plan was created.
    pub pending_since: Instant,
}

/// Per-competition lifecycle machine: `pending → active → completed`, with
/// `cancelled` reachable from `pending` and `completed`.
#[derive(Debug, Clone)]
pub struct CompetitionStateMachine {
    status: CompetitionStatus,
    version: u64,
    pending: Option<Plan>,
}

impl Default for CompetitionStateMachine {
    fn default() -> Self {
        Self {
            status: CompetitionStatus::Pending,
            version: 0,
            pending: None,
        }
    }
}

impl CompetitionStateMachine {
    /// Create a new state machine initialised in the pending state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a machine from persisted status and version.
    pub fn restore(status: CompetitionStatus, version: u64) -> Self {
        Self {
            status,
            version,
            pending: None,
        }
    }

    /// Inspect the current status.
    pub fn status(&self) -> CompetitionStatus {
        self.status
    }

    /// Number of transitions applied so far.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Plan a transition by validating that the event can be applied from the current status.
    /// Returns a Plan that can later be applied or aborted.
    pub fn plan(&mut self, event: CompetitionEvent) -> Result<Plan, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }

        let next = self
            .compute_transition(event)
            .map_err(PlanError::InvalidTransition)?;

        let plan = Plan {
            id: Uuid::new_v4(),
            from: self.status,
            to: next,
            event,
            version_next: self.version + 1,
            pending_since: Instant::now(),
        };

        self.pending = Some(plan.clone());

        Ok(plan)
    }

    /// Apply a planned transition, moving the machine to the next status.
    pub fn apply(&mut self, plan_id: PlanId) -> Result<CompetitionStatus, ApplyError> {
        let plan = self.pending.take().ok_or(ApplyError::NoPending)?;

        if plan.id != plan_id {
            let expected_plan_id = plan.id;
            self.pending = Some(plan);
            return Err(ApplyError::IdMismatch {
                expected: expected_plan_id,
                got: plan_id,
            });
        }

        if self.status != plan.from {
            return Err(ApplyError::StatusMismatch {
                expected: plan.from,
                actual: self.status,
            });
        }

        if self.version + 1 != plan.version_next {
            return Err(ApplyError::VersionMismatch {
                expected: plan.version_next,
                actual: self.version + 1,
            });
        }

        self.status = plan.to;
        self.version = plan.version_next;

        Ok(self.status)
    }

    /// Abort a planned transition without applying it.
    pub fn abort(&mut self, plan_id: PlanId) -> Result<(), AbortError> {
        let plan = self.pending.as_ref().ok_or(AbortError::NoPending)?;

        if plan.id != plan_id {
            return Err(AbortError::IdMismatch {
                expected: plan.id,
                got: plan_id,
            });
        }

        self.pending = None;
        Ok(())
    }

    fn compute_transition(
        &self,
        event: CompetitionEvent,
    ) -> Result<CompetitionStatus, InvalidTransition> {
        let next = match (self.status, event) {
            (CompetitionStatus::Pending, CompetitionEvent::Start) => CompetitionStatus::Active,
            (CompetitionStatus::Active, CompetitionEvent::End(_)) => CompetitionStatus::Completed,
            (CompetitionStatus::Pending, CompetitionEvent::Cancel)
            | (CompetitionStatus::Completed, CompetitionEvent::Cancel) => {
                CompetitionStatus::Cancelled
            }
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}
