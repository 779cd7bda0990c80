use futures::future::BoxFuture;
use thiserror::Error;

use crate::state::competition::CompetitionId;

/// Everything a scorer may look at to grade one attempt.
#[derive(Debug, Clone)]
pub struct SolutionAttempt {
    /// Competition the attempt belongs to.
    pub competition_id: CompetitionId,
    /// External challenge reference.
    pub challenge_id: String,
    /// Submitting participant.
    pub participant: String,
    /// Source code.
    pub code: String,
    /// Language identifier.
    pub language: String,
    /// Score reported by an external runner, if any.
    pub reported_score: Option<u32>,
}

/// Failure of a scorer to grade an attempt.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ScoringError(pub String);

/// Grades submissions. Called outside any competition lock.
pub trait SolutionScorer: Send + Sync {
    /// Score `attempt`.
    fn score(&self, attempt: SolutionAttempt) -> BoxFuture<'static, Result<u32, ScoringError>>;
}

/// Placeholder used until a real judge is plugged in.
///
/// Scores 0 unless built with `trust_reported`, in which case the score sent by
/// the client is taken as-is. Anybody can post any score that way, so it is
/// only meant for demos and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct StubScorer {
    trust_reported: bool,
}

impl StubScorer {
    /// Stub that accepts reported scores when `trust_reported` is set.
    pub fn new(trust_reported: bool) -> Self {
        Self { trust_reported }
    }
}

impl SolutionScorer for StubScorer {
    fn score(&self, attempt: SolutionAttempt) -> BoxFuture<'static, Result<u32, ScoringError>> {
        let score = match attempt.reported_score {
            Some(score) if self.trust_reported => score,
            _ => 0,
        };
        Box::pin(async move { Ok(score) })
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn attempt(reported_score: Option<u32>) -> SolutionAttempt {
        SolutionAttempt {
            competition_id: Uuid::new_v4(),
            challenge_id: "two-sum".into(),
            participant: "bob".into(),
            code: "print(1)".into(),
            language: "python".into(),
            reported_score,
        }
    }

    #[tokio::test]
    async fn reported_score_is_ignored_by_default() {
        let scorer = StubScorer::default();
        assert_eq!(scorer.score(attempt(Some(1000))).await.unwrap(), 0);
        assert_eq!(scorer.score(attempt(None)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn trusting_stub_takes_the_reported_score() {
        let scorer = StubScorer::new(true);
        assert_eq!(scorer.score(attempt(Some(80))).await.unwrap(), 80);
        assert_eq!(scorer.score(attempt(None)).await.unwrap(), 0);
    }
}
