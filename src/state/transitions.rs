use tracing::info;

use crate::{
    error::ServiceError,
    state::{
        SharedState, Update,
        competition::{Competition, CompetitionId, CompetitionRecord},
        state_machine::{CompetitionEvent, Plan},
    },
};

/// Decision taken by the guard of [`run_transition`] before planning.
pub enum Gate<T> {
    /// Plan and apply the transition.
    Proceed,
    /// Leave the competition untouched and return this value.
    Skip(T),
}

/// Result of [`run_transition`].
pub struct Transitioned<T> {
    /// Record after the call.
    pub record: CompetitionRecord,
    /// Value returned by the guard or the work closure.
    pub outcome: T,
    /// Whether the state machine moved.
    pub transitioned: bool,
}

/// Execute a lifecycle transition on competition `id` under its lock.
///
/// `guard` inspects the current record first and may skip (idempotent no-op) or
/// reject. Otherwise `event` is planned, `work` fills in the draft, the draft is
/// persisted and the plan applied. Concurrent callers are serialized so exactly
/// one of them moves the machine; the others see the new status in `guard`.
pub async fn run_transition<T, G, F>(
    state: &SharedState,
    id: CompetitionId,
    event: CompetitionEvent,
    guard: G,
    work: F,
) -> Result<Transitioned<T>, ServiceError>
where
    G: FnOnce(&CompetitionRecord) -> Result<Gate<T>, ServiceError>,
    F: FnOnce(&mut Competition, &Plan) -> Result<T, ServiceError>,
{
    let committed = state
        .update_competition(id, |record| match guard(record)? {
            Gate::Skip(value) => Ok(Update::Unchanged(value)),
            Gate::Proceed => record.transition(event, work).map(Update::Changed),
        })
        .await?;

    if committed.changed {
        info!(
            competition_id = %id,
            event = ?event,
            status = ?committed.record.status(),
            version = committed.record.machine.version(),
            "competition transitioned"
        );
    }

    Ok(Transitioned {
        record: committed.record,
        outcome: committed.value,
        transitioned: committed.changed,
    })
}
