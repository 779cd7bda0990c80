use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Respond with the health payload while logging connectivity issues.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let reachable = match state.require_store().await {
        Ok(store) => match store.health_check().await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "storage health check failed");
                false
            }
        },
        Err(_) => {
            warn!("storage unavailable (degraded mode)");
            false
        }
    };

    let loaded = state.loaded_competitions();
    if !reachable || state.is_degraded() {
        HealthResponse::degraded(loaded)
    } else {
        HealthResponse::ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::competition_store::MemoryCompetitionStore,
        state::AppState,
    };

    #[tokio::test]
    async fn healthy_memory_store_reports_ok() {
        let state = AppState::in_memory(AppConfig::default());
        let health = health_status(&state).await;
        assert_eq!(health, HealthResponse::ok(0));
    }

    #[tokio::test]
    async fn missing_store_reports_degraded() {
        let state = AppState::new(AppConfig::default());
        assert_eq!(health_status(&state).await, HealthResponse::degraded(0));
    }

    #[tokio::test]
    async fn failing_health_check_reports_degraded() {
        let store = Arc::new(MemoryCompetitionStore::new());
        let state = AppState::with_store(AppConfig::default(), store.clone());
        store.set_offline(true);

        assert_eq!(health_status(&state).await, HealthResponse::degraded(0));

        store.set_offline(false);
        assert_eq!(health_status(&state).await, HealthResponse::ok(0));
    }
}
