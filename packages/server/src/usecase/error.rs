//! UseCase 層のエラー型

use thiserror::Error;

use crate::domain::{ConnectionError, RoomError, StoreError};

/// RoomController のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    InvalidRoom(#[from] RoomError),
    #[error("{controller} controller cannot hold {actual} room '{room}'")]
    UnsupportedRoomKind {
        controller: &'static str,
        actual: &'static str,
        room: String,
    },
    #[error("failed to close connection: {0}")]
    Connection(#[from] ConnectionError),
}
