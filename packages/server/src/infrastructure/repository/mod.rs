//! RoomStore の実装
//!
//! - `inmemory`: HashMap をストレージとして使う実装
//! - `redb`: redb による永続化実装（有効期限インデックス付き）

pub mod inmemory;
pub mod redb;

pub use inmemory::MemoryRoomStore;
pub use redb::RedbRoomStore;
