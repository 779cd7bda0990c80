use std::cmp::Ordering;

use time::OffsetDateTime;
use tracing::{info, warn};
use validator::Validate;

use crate::{
    dao::models::SubmissionEntity,
    dto::{
        competition::{LeaderboardEntry, ParticipantView},
        submission::{SubmissionResponse, SubmitRequest},
    },
    error::ServiceError,
    services::{competition_service, room_events, scoring::SolutionAttempt},
    state::{
        SharedState, Update,
        competition::{CompetitionId, Participant, Submission, Winner},
        state_machine::EndTrigger,
    },
};

/// Record a submission for `participant`.
///
/// The attempt is scored before the competition lock is taken; the bookkeeping
/// then re-checks that the competition is still active, so an attempt racing the
/// end is rejected rather than counted after the winner is frozen.
pub async fn submit(
    state: &SharedState,
    id: CompetitionId,
    participant: &str,
    request: SubmitRequest,
) -> Result<SubmissionResponse, ServiceError> {
    request.validate()?;

    let current = state.read_competition(id).await?;
    current.ensure_can_submit(participant)?;

    let attempt = SolutionAttempt {
        competition_id: id,
        challenge_id: current.competition.challenge_id.clone(),
        participant: participant.to_owned(),
        code: request.code.clone(),
        language: request.language.clone(),
        reported_score: request.reported_score,
    };
    let score = state.scorer().score(attempt).await.map_err(|err| {
        warn!(competition_id = %id, participant, error = %err, "scoring failed");
        ServiceError::Scoring(err.to_string())
    })?;

    let mut submission = Submission {
        participant: participant.to_owned(),
        code: request.code,
        language: request.language,
        submitted_at: OffsetDateTime::now_utc(),
        is_auto_submitted: request.is_auto_submitted,
        score,
    };
    let committed = state
        .update_competition(id, |record| {
            // stamped under the lock so arrival order matches counting order
            submission.submitted_at = OffsetDateTime::now_utc();
            let updated = record.record_submission(&submission)?;
            Ok(Update::Changed(updated))
        })
        .await?;

    // the count already stands; a lost audit entry must not undo it
    if let Err(err) = state
        .log_submission(SubmissionEntity {
            competition_id: id,
            submission,
        })
        .await
    {
        warn!(competition_id = %id, participant, error = %err, "failed to log submission");
    }

    let updated = committed.value;
    info!(
        competition_id = %id,
        participant,
        score,
        auto = updated.auto_submitted,
        count = updated.submission_count,
        "submission counted"
    );
    room_events::broadcast_submission_update(state, id, participant, score);

    let mut status = committed.record.status();
    let mut winner = None;
    if state.config().end_when_all_submitted && committed.record.competition.all_seated_submitted()
    {
        let ended =
            competition_service::end(state, id, Some(participant), EndTrigger::AllSubmitted)
                .await?;
        status = ended.competition.status;
        winner = ended.winner;
    }

    Ok(SubmissionResponse {
        score,
        participant: ParticipantView::from(&updated),
        status,
        winner,
    })
}

/// Pick the winner among seated participants that submitted.
///
/// Highest score wins; ties go to the earliest counted submission, then to the
/// earliest join. `None` when nobody submitted.
pub fn derive_winner<'a, I>(participants: I) -> Option<Winner>
where
    I: IntoIterator<Item = &'a Participant>,
{
    let mut best: Option<(&Participant, OffsetDateTime)> = None;

    for candidate in participants {
        if !candidate.is_seated() {
            continue;
        }
        let Some(submitted_at) = candidate.last_submission_time else {
            continue;
        };

        let better = match best {
            None => true,
            Some((current, current_time)) => match candidate.score.cmp(&current.score) {
                Ordering::Greater => true,
                Ordering::Less => false,
                Ordering::Equal => submitted_at < current_time,
            },
        };
        if better {
            best = Some((candidate, submitted_at));
        }
    }

    best.map(|(participant, submitted_at)| Winner {
        user: participant.user.clone(),
        score: participant.score,
        last_submission_time: submitted_at,
    })
}

/// Seated participants ranked the same way as [`derive_winner`]; non-submitters last.
pub async fn leaderboard(
    state: &SharedState,
    id: CompetitionId,
) -> Result<Vec<LeaderboardEntry>, ServiceError> {
    let record = state.read_competition(id).await?;
    Ok(rank(record.competition.participants.values()))
}

fn rank<'a, I>(participants: I) -> Vec<LeaderboardEntry>
where
    I: IntoIterator<Item = &'a Participant>,
{
    let mut seated: Vec<&Participant> = participants
        .into_iter()
        .filter(|participant| participant.is_seated())
        .collect();

    // stable sort keeps join order for full ties
    seated.sort_by(|a, b| match (a.last_submission_time, b.last_submission_time) {
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
        (Some(at), Some(bt)) => b.score.cmp(&a.score).then(at.cmp(&bt)),
    });

    seated
        .into_iter()
        .enumerate()
        .map(|(index, participant)| LeaderboardEntry {
            rank: index + 1,
            username: participant.user.clone(),
            score: participant.score,
            last_submission_time: participant.last_submission_time,
            status: participant.status,
        })
        .collect()
}
