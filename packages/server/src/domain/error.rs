//! ドメイン層のエラー型

use thiserror::Error;

/// Room 定義のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("invalid room definition: {0}")]
    InvalidDefinition(String),
}

/// RoomStore のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("room '{0}' already exists")]
    AlreadyExists(String),
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("storage is corrupted: {0}")]
    Corrupted(String),
    #[error("storage is closed")]
    Closed,
}

/// 接続受付（認証）のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing field '{0}'")]
    MissingField(&'static str),
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
}

/// 接続ハンドルのエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("connection '{0}' is closed")]
    Closed(String),
    #[error("invalid connection id: {0}")]
    InvalidId(String),
}

/// メッセージエンベロープのエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("unknown message type '{0}'")]
    UnknownType(String),
}
