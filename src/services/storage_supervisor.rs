use std::{future::Future, sync::Arc, time::Duration};

use tokio::{sync::watch, time::sleep};
use tracing::{info, warn};

use crate::{
    dao::{round_store::RoundStore, storage::StorageError},
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Connect to the round store and keep the shared state in degraded mode while it is unavailable.
///
/// Returns once `shutdown` flips to `true` or its sender is dropped.
pub async fn run<F, Fut>(state: SharedState, mut connect: F, mut shutdown: watch::Receiver<bool>)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn RoundStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        let connected = tokio::select! {
            result = connect() => result,
            _ = stopped(&mut shutdown) => return,
        };

        match connected {
            Ok(store) => {
                state.install_round_store(store.clone()).await;
                info!("round store connected; leaving degraded mode");
                delay = INITIAL_DELAY;

                tokio::select! {
                    _ = supervise(&state, store.as_ref()) => {}
                    _ = stopped(&mut shutdown) => return,
                }

                warn!("exhausted round store reconnect attempts; staying in degraded mode");
                state.clear_round_store().await;
            }
            Err(err) => {
                warn!(error = %err, retry_in_ms = delay.as_millis() as u64, "round store connection attempt failed");
            }
        }

        tokio::select! {
            _ = sleep(delay) => {}
            _ = stopped(&mut shutdown) => return,
        }
        delay = (delay * 2).min(MAX_DELAY);
    }
}

/// Poll the store's health, reconnecting in place after a failed check.
///
/// Returns when every reconnect attempt of one failure has failed.
async fn supervise(state: &SharedState, store: &dyn RoundStore) {
    loop {
        match store.health_check().await {
            Ok(()) => {
                if state.is_degraded() {
                    info!("round store healthy again; leaving degraded mode");
                    state.update_degraded(false);
                }
                sleep(HEALTH_POLL_INTERVAL).await;
            }
            Err(err) => {
                warn!(error = %err, "round store health check failed");
                if !reconnect(state, store).await {
                    return;
                }
                state.update_degraded(false);
                sleep(HEALTH_POLL_INTERVAL).await;
            }
        }
    }
}

async fn reconnect(state: &SharedState, store: &dyn RoundStore) -> bool {
    let mut reconnect_delay = INITIAL_DELAY;

    for attempt in 0..MAX_RECONNECT_ATTEMPTS {
        match store.try_reconnect().await {
            Ok(()) => {
                info!(attempt, "round store reconnection succeeded after health check failure");
                return true;
            }
            Err(err) => {
                if attempt == 0 {
                    warn!(attempt, error = %err, "round store reconnect first attempt failed; entering degraded mode");
                    state.update_degraded(true);
                } else {
                    warn!(attempt, error = %err, "round store reconnect attempt failed");
                }
                sleep(reconnect_delay).await;
                reconnect_delay = (reconnect_delay * 2).min(MAX_DELAY);
            }
        }
    }

    false
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender counts as a stop request.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio::time::timeout;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            cache::MemoryCacheBackend, event_bus::LocalEventBus, round_store::MemoryRoundStore,
        },
        state::AppState,
    };

    fn bare_state() -> SharedState {
        AppState::new(
            AppConfig::default(),
            Arc::new(MemoryCacheBackend::new()),
            Arc::new(LocalEventBus::default()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_the_store_connects() {
        let state = bare_state();
        let attempts = Arc::new(AtomicU32::new(0));
        let store = MemoryRoundStore::new();
        let (stop_tx, stop_rx) = watch::channel(false);

        let connect = {
            let attempts = attempts.clone();
            move || {
                let attempts = attempts.clone();
                let store = store.clone();
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(StorageError::unavailable(
                            "refused".into(),
                            std::io::Error::other("connection refused"),
                        ))
                    } else {
                        Ok(Arc::new(store) as Arc<dyn RoundStore>)
                    }
                }
            }
        };
        let supervisor = tokio::spawn(run(state.clone(), connect, stop_rx));

        assert!(state.is_degraded());
        let mut degraded = state.degraded_watcher();
        timeout(Duration::from_secs(30), degraded.wait_for(|value| !*value))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(state.round_store().await.is_some());

        stop_tx.send(true).unwrap();
        supervisor.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failing_health_checks_degrade_then_recover() {
        let state = bare_state();
        let store = MemoryRoundStore::new();
        let (stop_tx, stop_rx) = watch::channel(false);

        let connect = {
            let store = store.clone();
            move || {
                let store = store.clone();
                async move { Ok(Arc::new(store) as Arc<dyn RoundStore>) }
            }
        };
        let supervisor = tokio::spawn(run(state.clone(), connect, stop_rx));
        let mut degraded = state.degraded_watcher();
        degraded.wait_for(|value| !*value).await.unwrap();

        store.set_available(false);
        timeout(Duration::from_secs(30), degraded.wait_for(|value| *value))
            .await
            .unwrap()
            .unwrap();

        store.set_available(true);
        timeout(Duration::from_secs(60), degraded.wait_for(|value| !*value))
            .await
            .unwrap()
            .unwrap();

        stop_tx.send(true).unwrap();
        supervisor.await.unwrap();
    }
}
