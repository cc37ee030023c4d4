//! ドメイン層
//!
//! ルームのライフサイクル、接続 ID、ストア / メッセージハンドラの trait を定義する。

mod connection;
mod error;
mod handler;
mod repository;
mod room;

pub use connection::{ClientConnection, ConnectionId, Outbound, OutboundSender};
pub use error::{AuthError, ConnectionError, ProtocolError, RoomError, StoreError};
pub use handler::MessageHandler;
#[cfg(test)]
pub use repository::MockRoomStore;
pub use repository::{RoomStore, TemporaryRoomStore};
pub use room::{Room, RoomKind, next_recurring_deadline};
