//! 接続レジストリの実装
//!
//! - `connection`: 接続 ID → 接続ハンドル
//! - `room`: ルーム ID → 接続レジストリ

pub mod connection;
pub mod room;

pub use connection::ConnectionRegistry;
pub use room::RoomConnectionRegistry;
