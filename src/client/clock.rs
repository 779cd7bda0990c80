use std::time::Duration;

use time::OffsetDateTime;

use crate::{dto::competition::CompetitionSnapshot, state::state_machine::CompetitionStatus};

/// Milliseconds left before `actual_start + time_limit_minutes`, never negative.
pub fn remaining_ms(actual_start: OffsetDateTime, time_limit_minutes: u32, now: OffsetDateTime) -> u64 {
    let deadline = actual_start + time::Duration::minutes(i64::from(time_limit_minutes));
    let left = (deadline - now).whole_milliseconds();
    u64::try_from(left.max(0)).unwrap_or(u64::MAX)
}

/// Observation made by [`CountdownClock::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Time is left.
    Running(Duration),
    /// The deadline was reached on this tick. Reported once per clock.
    Expired,
    /// The clock already fired; nothing to do.
    Spent,
}

/// Local, advisory countdown of one active competition.
#[derive(Debug, Clone)]
pub struct CountdownClock {
    actual_start: OffsetDateTime,
    time_limit_minutes: u32,
    fired: bool,
}

impl CountdownClock {
    /// Clock counting down from `actual_start` for `time_limit_minutes`.
    pub fn new(actual_start: OffsetDateTime, time_limit_minutes: u32) -> Self {
        Self {
            actual_start,
            time_limit_minutes,
            fired: false,
        }
    }

    /// Clock for `snapshot` when it is active; `None` otherwise.
    pub fn for_snapshot(snapshot: &CompetitionSnapshot) -> Option<Self> {
        if snapshot.status != CompetitionStatus::Active {
            return None;
        }
        snapshot
            .actual_start_time
            .map(|start| Self::new(start, snapshot.time_limit))
    }

    /// Time left at `now`.
    pub fn remaining(&self, now: OffsetDateTime) -> Duration {
        Duration::from_millis(remaining_ms(self.actual_start, self.time_limit_minutes, now))
    }

    /// Whether expiry was already reported.
    pub fn has_fired(&self) -> bool {
        self.fired
    }

    /// Re-evaluate at `now`. Returns [`Tick::Expired`] exactly once.
    pub fn tick(&mut self, now: OffsetDateTime) -> Tick {
        if self.fired {
            return Tick::Spent;
        }
        let remaining = self.remaining(now);
        if remaining.is_zero() {
            self.fired = true;
            Tick::Expired
        } else {
            Tick::Running(remaining)
        }
    }
}
