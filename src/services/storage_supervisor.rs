use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{
    dao::{competition_store::CompetitionStore, storage::StorageError},
    state::SharedState,
};

/// Pacing of the storage supervisor.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorTimings {
    /// Wait after the first failed connection or reconnection.
    pub first_retry: Duration,
    /// Upper bound of the doubling wait.
    pub retry_ceiling: Duration,
    /// Period between health checks of a connected store.
    pub health_poll: Duration,
    /// Reconnections tried on a lost store before it is dropped.
    pub reconnect_attempts: u32,
}

impl Default for SupervisorTimings {
    fn default() -> Self {
        Self {
            first_retry: Duration::from_secs(1),
            retry_ceiling: Duration::from_secs(10),
            health_poll: Duration::from_secs(5),
            reconnect_attempts: 3,
        }
    }
}

impl SupervisorTimings {
    fn next_retry(&self, current: Duration) -> Duration {
        (current * 2).min(self.retry_ceiling)
    }
}

/// Keep a competition store installed on `state`, degrading while none answers.
pub async fn run<F, Fut>(state: SharedState, connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn CompetitionStore>, StorageError>> + Send,
{
    supervise(state, connect, SupervisorTimings::default()).await
}

/// [`run`] with explicit pacing.
///
/// Each installed store warms the competition map with the running
/// competitions so their deadlines resume after a restart. A store that fails
/// its health check and every reconnection is removed and `connect` is called
/// again.
pub async fn supervise<F, Fut>(state: SharedState, mut connect: F, timings: SupervisorTimings)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn CompetitionStore>, StorageError>> + Send,
{
    loop {
        let store = connect_until_ready(&mut connect, &timings).await;
        adopt(&state, store.clone()).await;
        watch_store(&state, store.as_ref(), &timings).await;

        warn!("storage lost after every reconnection; dropping it");
        state.clear_store().await;
        sleep(timings.first_retry).await;
    }
}

async fn connect_until_ready<F, Fut>(connect: &mut F, timings: &SupervisorTimings) -> Arc<dyn CompetitionStore>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Arc<dyn CompetitionStore>, StorageError>>,
{
    let mut wait = timings.first_retry;
    loop {
        match connect().await {
            Ok(store) => return store,
            Err(err) => {
                warn!(error = %err, retry_in_ms = wait.as_millis() as u64, "storage connection failed");
                sleep(wait).await;
                wait = timings.next_retry(wait);
            }
        }
    }
}

async fn adopt(state: &SharedState, store: Arc<dyn CompetitionStore>) {
    state.install_store(store).await;
    info!("storage connected; leaving degraded mode");
    match state.hydrate_from_store().await {
        Ok(loaded) => info!(loaded, "running competitions restored"),
        Err(err) => warn!(error = %err, "could not restore running competitions"),
    }
}

/// Poll `store` until it fails a health check and cannot be reconnected.
async fn watch_store(state: &SharedState, store: &dyn CompetitionStore, timings: &SupervisorTimings) {
    loop {
        sleep(timings.health_poll).await;
        let Err(err) = store.health_check().await else {
            if state.is_degraded() {
                info!("storage healthy again; leaving degraded mode");
                state.update_degraded(false);
            }
            continue;
        };

        warn!(error = %err, "storage health check failed; entering degraded mode");
        state.update_degraded(true);
        if !reconnect(store, timings).await {
            return;
        }
        info!("storage reconnected");
        state.update_degraded(false);
    }
}

async fn reconnect(store: &dyn CompetitionStore, timings: &SupervisorTimings) -> bool {
    let mut wait = timings.first_retry;
    for attempt in 1..=timings.reconnect_attempts {
        match store.try_reconnect().await {
            Ok(()) => return true,
            Err(err) => {
                debug!(attempt, error = %err, "storage reconnection failed");
                if attempt < timings.reconnect_attempts {
                    sleep(wait).await;
                    wait = timings.next_retry(wait);
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use time::OffsetDateTime;
    use tokio::{sync::watch, time::timeout};

    use super::*;
    use crate::{
        config::AppConfig,
        dao::competition_store::MemoryCompetitionStore,
        dto::competition::CreateCompetitionRequest,
        services::competition_service,
        state::{AppState, competition::CompetitionType},
    };

    fn quick() -> SupervisorTimings {
        SupervisorTimings {
            first_retry: Duration::from_millis(5),
            retry_ceiling: Duration::from_millis(20),
            health_poll: Duration::from_millis(10),
            reconnect_attempts: 2,
        }
    }

    async fn wait_until_degraded(flag: &mut watch::Receiver<bool>, degraded: bool) {
        timeout(Duration::from_secs(5), flag.wait_for(|current| *current == degraded))
            .await
            .expect("degraded flag never changed")
            .expect("state dropped");
    }

    async fn started_duel(store: Arc<MemoryCompetitionStore>) {
        let state = AppState::with_store(AppConfig::default(), store);
        let request = CreateCompetitionRequest {
            title: "Restart".into(),
            description: String::new(),
            competition_type: CompetitionType::OneVsOne,
            challenge_id: "two-sum".into(),
            start_time: OffsetDateTime::now_utc() + time::Duration::hours(1),
            time_limit: 30,
            max_participants: 2,
            is_public: true,
            prize_pool: None,
            invite_username: None,
        };
        let id = competition_service::create(&state, "alice", request)
            .await
            .unwrap()
            .id;
        competition_service::join(&state, id, "alice").await.unwrap();
        competition_service::join(&state, id, "bob").await.unwrap();
        competition_service::start(&state, id, "alice").await.unwrap();
    }

    #[test]
    fn retry_wait_doubles_up_to_the_ceiling() {
        let timings = SupervisorTimings::default();
        let mut wait = timings.first_retry;
        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(wait.as_secs());
            wait = timings.next_retry(wait);
        }
        assert_eq!(seen, vec![1, 2, 4, 8, 10, 10]);
    }

    #[tokio::test]
    async fn failed_connections_are_retried_until_one_succeeds() {
        let store = Arc::new(MemoryCompetitionStore::new());
        started_duel(store.clone()).await;

        let state = AppState::new(AppConfig::default());
        let mut degraded = state.degraded_watcher();
        assert!(state.is_degraded());

        let calls = Arc::new(AtomicUsize::new(0));
        let connect = {
            let calls = calls.clone();
            let store = store.clone();
            move || {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                let store = store.clone();
                async move {
                    if attempt < 2 {
                        return Err(StorageError::unavailable(
                            "not yet".into(),
                            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
                        ));
                    }
                    Ok(store as Arc<dyn CompetitionStore>)
                }
            }
        };
        let task = tokio::spawn(supervise(state.clone(), connect, quick()));

        wait_until_degraded(&mut degraded, false).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // the running competition was warmed on connect
        assert_eq!(state.loaded_competitions(), 1);
        task.abort();
    }

    #[tokio::test]
    async fn failed_health_check_degrades_until_the_store_answers() {
        let store = Arc::new(MemoryCompetitionStore::new());
        let state = AppState::new(AppConfig::default());
        let mut degraded = state.degraded_watcher();
        let connect = {
            let store = store.clone();
            move || {
                let store = store.clone();
                async move { Ok(store as Arc<dyn CompetitionStore>) }
            }
        };
        let task = tokio::spawn(supervise(state.clone(), connect, quick()));
        wait_until_degraded(&mut degraded, false).await;

        store.set_offline(true);
        wait_until_degraded(&mut degraded, true).await;

        store.set_offline(false);
        wait_until_degraded(&mut degraded, false).await;
        assert!(state.require_store().await.is_ok());
        task.abort();
    }
}
