//! Application state shared by handlers and background tasks.

/// Per-round local fanout to WebSocket subscribers.
pub mod hub;
pub mod leaderboard;
/// Round window, status and participants.
pub mod round;
/// Tap to points conversion.
pub mod scoring;
/// Per-user tap session and throttle.
pub mod session;
/// Caller identity and role.
pub mod user;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, watch};

use crate::{
    config::AppConfig,
    dao::{
        cache::{CacheBackend, CacheRepository},
        event_bus::EventBus,
        round_store::RoundStore,
    },
    error::ServiceError,
};

pub use self::hub::RoundHub;

/// Reference-counted handle passed to every handler.
pub type SharedState = Arc<AppState>;

/// Central application state: configuration, storage handles and the local fanout.
pub struct AppState {
    config: AppConfig,
    instance_id: String,
    round_store: RwLock<Option<Arc<dyn RoundStore>>>,
    degraded: watch::Sender<bool>,
    cache: CacheRepository,
    hub: RoundHub,
    event_bus: Arc<dyn EventBus>,
    tap_locks: DashMap<(String, String), Arc<Mutex<()>>>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a round store is installed.
    pub fn new(
        config: AppConfig,
        cache_backend: Arc<dyn CacheBackend>,
        event_bus: Arc<dyn EventBus>,
    ) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        let instance_id = config.instance_id();
        let cache = CacheRepository::new(cache_backend, config.cache_settings());
        let hub = RoundHub::new(config.broadcast.local_capacity);
        Arc::new(Self {
            config,
            instance_id,
            round_store: RwLock::new(None),
            degraded: degraded_tx,
            cache,
            hub,
            event_bus,
            tap_locks: DashMap::new(),
        })
    }

    /// Loaded configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Identity attached to every event this instance publishes.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Repository over the live-round cache.
    pub fn cache(&self) -> &CacheRepository {
        &self.cache
    }

    /// Local WebSocket fanout.
    pub fn hub(&self) -> &RoundHub {
        &self.hub
    }

    /// Bus shared with the other instances.
    pub fn event_bus(&self) -> Arc<dyn EventBus> {
        self.event_bus.clone()
    }

    /// Obtain a handle to the current round store, if one is installed.
    pub async fn round_store(&self) -> Option<Arc<dyn RoundStore>> {
        let guard = self.round_store.read().await;
        guard.as_ref().cloned()
    }

    /// Current round store or [`ServiceError::Degraded`].
    pub async fn require_round_store(&self) -> Result<Arc<dyn RoundStore>, ServiceError> {
        self.round_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new round store implementation and leave degraded mode.
    pub async fn install_round_store(&self, store: Arc<dyn RoundStore>) {
        {
            let mut guard = self.round_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current round store and enter degraded mode.
    pub async fn clear_round_store(&self) {
        {
            let mut guard = self.round_store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Whether the durable store is missing or unhealthy.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Mutex serialising the taps of one user in one round.
    pub fn tap_lock(&self, user_id: &str, round_id: &str) -> Arc<Mutex<()>> {
        self.tap_locks
            .entry((user_id.to_owned(), round_id.to_owned()))
            .or_default()
            .clone()
    }

    /// Forget every tap lock of a purged round.
    pub fn release_tap_locks(&self, round_id: &str) {
        self.tap_locks.retain(|(_, round), _| round != round_id);
    }
}


#[cfg(test)]
mod tests {
    use super::testing::TestHarness;

    #[tokio::test]
    async fn installing_and_clearing_the_store_toggles_degraded_mode() {
        let harness = TestHarness::new().await;
        let state = &harness.state;
        let mut watcher = state.degraded_watcher();
        assert!(!state.is_degraded());

        state.clear_round_store().await;
        watcher.changed().await.unwrap();
        assert!(*watcher.borrow());
        assert!(state.require_round_store().await.is_err());
    }

    #[tokio::test]
    async fn tap_locks_are_shared_per_user_and_round() {
        let harness = TestHarness::new().await;
        let state = &harness.state;
        let a = state.tap_lock("u", "r1");
        let b = state.tap_lock("u", "r1");
        assert!(std::sync::Arc::ptr_eq(&a, &b));

        state.release_tap_locks("r1");
        let c = state.tap_lock("u", "r1");
        assert!(!std::sync::Arc::ptr_eq(&a, &c));
    }
}
