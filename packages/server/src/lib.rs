//! Room-scoped WebSocket signaling relay.
//!
//! Peers join a room with `?room=..&user=..` and exchange typed JSON
//! envelopes (`offer`, `answer`, `candidate`) addressed to each other by user
//! id. Rooms are permanent, valid for a time window, or open on a recurring
//! schedule, and are administered over a separate HTTP API.

// layers
pub mod domain;
pub mod infrastructure;
pub mod ui;
pub mod usecase;

pub mod config;
