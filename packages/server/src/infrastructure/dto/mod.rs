//! Data Transfer Objects (DTOs).
//!
//! - `storage`: redb に保存するルームレコード
//! - `websocket`: WebSocket メッセージのエンベロープ

pub mod storage;
pub mod websocket;
