//! Utilities shared by the relay packages: logging setup, unix-time helpers
//! and the single-pending-timer primitive used for room expiration.

pub mod logger;
pub mod scheduler;
pub mod time;
