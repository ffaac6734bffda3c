/// Fan-out of round events to the local hub and the shared bus.
pub mod broadcast_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Tap processing against the cache.
pub mod gameplay_service;
/// Health check service.
pub mod health_service;
/// Startup rebuild of the cache from the round store.
pub mod recovery_service;
/// Round creation, listing and lookup.
pub mod round_service;
/// Round store connection supervisor driving degraded mode.
pub mod storage_supervisor;
/// Periodic status, sync and cleanup sweeps.
pub mod sync_service;
/// WebSocket connection and message handling service.
pub mod websocket_service;
