#![allow(dead_code)]

use code_arena_back::{
    config::AppConfig,
    dto::competition::CreateCompetitionRequest,
    services::competition_service,
    state::{
        SharedState, Update,
        competition::{CompetitionId, CompetitionType},
    },
};
use time::{Duration, OffsetDateTime};

/// Defaults, with reported scores trusted so tests can pick the winner.
pub fn config() -> AppConfig {
    AppConfig {
        trust_reported_scores: true,
        ..AppConfig::default()
    }
}

pub fn request(kind: CompetitionType, seats: u32, time_limit: u32) -> CreateCompetitionRequest {
    CreateCompetitionRequest {
        title: "Friday arena".into(),
        description: "warm-up round".into(),
        competition_type: kind,
        challenge_id: "reverse-linked-list".into(),
        start_time: OffsetDateTime::now_utc() + Duration::hours(1),
        time_limit,
        max_participants: seats,
        is_public: true,
        prize_pool: None,
        invite_username: None,
    }
}

/// 1v1 created by `creator`, joined by alice and bob.
pub async fn seated_duel(state: &SharedState, creator: &str, time_limit: u32) -> CompetitionId {
    let id = competition_service::create(state, creator, request(CompetitionType::OneVsOne, 2, time_limit))
        .await
        .unwrap()
        .id;
    competition_service::join(state, id, "alice").await.unwrap();
    competition_service::join(state, id, "bob").await.unwrap();
    id
}

/// Started duel whose deadline already passed.
pub async fn overdue_duel(state: &SharedState, creator: &str) -> CompetitionId {
    let id = seated_duel(state, creator, 30).await;
    competition_service::start(state, id, creator).await.unwrap();
    backdate_start(state, id, Duration::minutes(31)).await;
    id
}

/// Move the actual start `by` into the past.
pub async fn backdate_start(state: &SharedState, id: CompetitionId, by: Duration) {
    state
        .update_competition(id, |record| {
            let start = record
                .competition
                .actual_start_time
                .unwrap_or_else(OffsetDateTime::now_utc);
            record.competition.actual_start_time = Some(start - by);
            Ok(Update::Changed(()))
        })
        .await
        .unwrap();
}
