//! Infrastructure 層
//!
//! 接続レジストリ、ルームストアの実装（インメモリ / redb）、永続化 / WebSocket の DTO。

pub mod dto;
pub mod registry;
pub mod repository;
