//! Library crate for round-tap-back, exposing modules for binaries and integration tests.

pub mod config;
/// Storage layers: live cache, event bus and durable round store.
pub mod dao;
/// Wire types for HTTP, WebSocket and inter-instance events.
pub mod dto;
/// Service and HTTP error types.
pub mod error;
/// Axum route trees.
pub mod routes;
/// Business logic behind the routes and background tasks.
pub mod services;
/// Shared application state and the round domain model.
pub mod state;
