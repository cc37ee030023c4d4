//! Shared state handed to the axum handlers.

use std::{collections::HashMap, sync::Arc, time::Duration};

use crate::{
    domain::{ClientConnection, MessageHandler},
    usecase::{Authenticator, RoomController},
};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Returns false to refuse the connection; the socket is then closed and no
/// closed hook runs for it.
pub type OpenedHook = Arc<dyn Fn(&ClientConnection) -> bool + Send + Sync>;
pub type ClosedHook = Arc<dyn Fn(&ClientConnection) + Send + Sync>;
pub type ShutdownHook = Arc<dyn Fn() -> Result<(), BoxError> + Send + Sync>;

/// Relay (WebSocket) endpoint state
pub struct RelayState {
    /// クエリパラメータ → 接続 ID
    pub authenticator: Authenticator,
    /// エンベロープの type → ハンドラ
    pub handlers: HashMap<String, Arc<dyn MessageHandler>>,
    pub on_opened: Vec<OpenedHook>,
    pub on_closed: Vec<ClosedHook>,
    /// 死活確認の ping 間隔 (0 なら送らない)
    pub ping_interval: Duration,
}

/// Which room variant an admin route group edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomVariant {
    Permanent,
    TimeWindow,
    Recurring,
}

/// Admin (HTTP) route group state
pub struct AdminState {
    pub controller: Arc<dyn RoomController>,
    pub variant: RoomVariant,
}
