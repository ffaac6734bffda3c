//! Round Tap Back binary entrypoint wiring REST, WebSocket, cache, event bus and round store layers.

use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::Router;
use tokio::{net::TcpListener, sync::watch, task::JoinHandle, time::timeout};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use round_tap_back::{
    config::AppConfig,
    dao::{
        cache::{CacheBackend, MemoryCacheBackend},
        event_bus::{EventBus, LocalEventBus},
    },
    routes,
    services::{broadcast_service, storage_supervisor, sync_service::SyncScheduler},
    state::{AppState, SharedState},
};

/// How long startup recovery waits for the round store before going ahead degraded.
const STORE_STARTUP_WAIT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let (cache_backend, event_bus) = build_cache_and_bus(&config)?;
    let app_state = AppState::new(config, cache_backend, event_bus);
    info!(instance_id = %app_state.instance_id(), "starting round tap back");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let supervisor = spawn_storage_supervisor(app_state.clone(), shutdown_rx.clone());
    let relay = tokio::spawn(broadcast_service::run_relay(
        app_state.clone(),
        shutdown_rx.clone(),
    ));

    let mut degraded = app_state.degraded_watcher();
    if timeout(STORE_STARTUP_WAIT, degraded.wait_for(|value| !*value))
        .await
        .is_err()
    {
        warn!("round store not ready; startup recovery runs without it");
    }
    let scheduler = SyncScheduler::start(app_state.clone(), shutdown_rx).await;

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    let served = axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum");

    info!("stopping background tasks");
    let _ = shutdown_tx.send(true);
    scheduler.join().await;
    let _ = relay.await;
    let _ = supervisor.await;

    served
}

/// Pick Redis for the cache and pub/sub when `REDIS_URL` is set, in-process otherwise.
fn build_cache_and_bus(
    config: &AppConfig,
) -> anyhow::Result<(Arc<dyn CacheBackend>, Arc<dyn EventBus>)> {
    #[cfg(feature = "redis-cache")]
    if let Ok(url) = env::var("REDIS_URL") {
        use round_tap_back::dao::{cache::redis::RedisCacheBackend, event_bus::redis::RedisEventBus};

        let backend = RedisCacheBackend::new(&url).context("configuring redis client")?;
        let bus = RedisEventBus::new(backend.clone(), config.broadcast.channel.clone());
        info!(channel = %config.broadcast.channel, "using redis cache and event bus");
        return Ok((Arc::new(backend), Arc::new(bus)));
    }

    warn!("REDIS_URL not set; using in-process cache and event bus");
    Ok((
        Arc::new(MemoryCacheBackend::new()),
        Arc::new(LocalEventBus::new(config.broadcast.local_capacity)),
    ))
}

/// Keep a MongoDB round store installed, toggling degraded mode while it is unreachable.
#[cfg(feature = "mongo-store")]
fn spawn_storage_supervisor(state: SharedState, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    use round_tap_back::dao::{
        round_store::{
            RoundStore,
            mongodb::{MongoConfig, MongoRoundStore},
        },
        storage::StorageError,
    };

    let uri = env::var("MONGO_URI").unwrap_or_else(|_| "mongodb://localhost:27017".into());
    let db_name = env::var("MONGO_DB").ok();

    let connect = move || {
        let uri = uri.clone();
        let db_name = db_name.clone();
        async move {
            let config = MongoConfig::from_uri(&uri, db_name.as_deref())
                .await
                .map_err(StorageError::from)?;
            let store = MongoRoundStore::connect(config)
                .await
                .map_err(StorageError::from)?;
            Ok::<_, StorageError>(Arc::new(store) as Arc<dyn RoundStore>)
        }
    };

    tokio::spawn(storage_supervisor::run(state, connect, shutdown))
}

/// Without a durable backend compiled in, rounds live in process memory.
#[cfg(not(feature = "mongo-store"))]
fn spawn_storage_supervisor(state: SharedState, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    use round_tap_back::dao::{
        round_store::{MemoryRoundStore, RoundStore},
        storage::StorageError,
    };

    warn!("built without mongo-store; rounds are kept in memory only");
    let connect = || async {
        Ok::<_, StorageError>(Arc::new(MemoryRoundStore::new()) as Arc<dyn RoundStore>)
    };
    tokio::spawn(storage_supervisor::run(state, connect, shutdown))
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
