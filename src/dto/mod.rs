/// Round events exchanged between instances and pushed to clients.
pub mod events;
/// Health endpoint payloads.
pub mod health;
/// REST payloads for round listing, creation and taps.
pub mod rounds;
/// Request validation helpers.
pub mod validation;
/// WebSocket message envelopes.
pub mod ws;
