use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Probe both stores and report `degraded` when either is unhealthy.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let mut healthy = true;

    match state.require_round_store().await {
        Ok(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "round store health check failed");
                healthy = false;
            }
        }
        Err(_) => {
            warn!("round store unavailable (degraded mode)");
            healthy = false;
        }
    }

    if let Err(err) = state.cache().ping().await {
        warn!(error = %err, "cache health check failed");
        healthy = false;
    }

    if healthy && !state.is_degraded() {
        HealthResponse::ok()
    } else {
        HealthResponse::degraded()
    }
}
