//! Repository trait 定義
//!
//! ルーム定義の永続化インターフェース。具体的な実装（インメモリ / redb）は
//! Infrastructure 層が提供する（依存性の逆転）。
//!
//! ストアは同期 API。redb のトランザクションが同期 API であり、
//! 各操作は短時間で終わる。

use super::{Room, StoreError};

/// Room Store trait
#[cfg_attr(test, mockall::automock)]
pub trait RoomStore: Send + Sync {
    /// ルームを保存する。既に存在し `allow_override` が false なら
    /// `StoreError::AlreadyExists` を返し、既存のレコードは変更しない。
    fn put(&self, room: Room, allow_override: bool) -> Result<(), StoreError>;

    /// ルームを削除する。存在しなければ `Ok(false)`。
    fn remove(&self, id: &str) -> Result<bool, StoreError>;

    fn get(&self, id: &str) -> Result<Option<Room>, StoreError>;

    fn close(&self) -> Result<(), StoreError>;
}

/// 有効期限付きルームのストア
pub trait TemporaryRoomStore: RoomStore {
    /// `valid_until < now` のルームをすべて削除し、削除したルームごとに
    /// `on_removed` を 1 回呼ぶ。残っているルームのうち最も早く期限切れになる
    /// ものを返す。
    fn clean_expired(
        &self,
        now: i64,
        on_removed: &mut dyn FnMut(&Room),
    ) -> Result<Option<Room>, StoreError>;
}
