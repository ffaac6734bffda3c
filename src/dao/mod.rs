/// Ephemeral live-round store (Redis or in-memory).
pub mod cache;
/// Inter-instance publish/subscribe channel.
pub mod event_bus;
/// Database model definitions.
pub mod models;
/// Durable round store of record (MongoDB or in-memory).
pub mod round_store;
/// Storage abstraction layer for database operations.
pub mod storage;
