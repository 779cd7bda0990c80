use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::{
    services::competition_service,
    state::{SharedState, state_machine::EndTrigger},
};

/// Spawn the background task ending competitions nobody ended in time.
///
/// Clients normally end a competition when their countdown expires; this loop
/// covers rooms every client left. It runs every `sweep_interval` and ends any
/// active competition whose deadline passed more than `deadline_grace` ago.
pub fn spawn_deadline_sweeper(state: SharedState) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(state.config().sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if state.is_degraded() {
                continue;
            }

            let ended = sweep_once(&state, OffsetDateTime::now_utc()).await;
            if ended > 0 {
                info!(ended, "deadline sweeper ended overdue competitions");
            }
        }
    });
}

/// End every active competition whose deadline plus grace is before `now`.
///
/// Only running competitions are asked from the store. Returns how many
/// competitions this call moved to `completed`.
pub async fn sweep_once(state: &SharedState, now: OffsetDateTime) -> usize {
    let grace = state.config().deadline_grace;
    let active = match state.active_competitions().await {
        Ok(active) => active,
        Err(err) => {
            debug!(error = %err, "deadline sweeper could not list running competitions");
            return 0;
        }
    };

    let mut ended = 0;
    for record in active {
        let id = record.id();
        let Some(deadline) = record.competition.deadline() else {
            continue;
        };
        if deadline + grace >= now {
            continue;
        }

        match competition_service::end(state, id, None, EndTrigger::Deadline).await {
            Ok(response) if response.transitioned => ended += 1,
            Ok(_) => {}
            Err(err) => warn!(competition_id = %id, error = %err, "deadline sweep failed"),
        }
    }

    ended
}
