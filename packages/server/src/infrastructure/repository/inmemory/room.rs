//! InMemory RoomStore 実装
//!
//! HashMap をインメモリ DB として使用する。`clean_expired` は全件走査なので、
//! 有効期限付きルームが大量にある場合は redb 実装を使う。

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use crate::domain::{Room, RoomStore, StoreError, TemporaryRoomStore};

/// インメモリ RoomStore 実装。`close` の後はすべての操作が `StoreError::Closed` を返す。
#[derive(Debug)]
pub struct MemoryRoomStore {
    rooms: RwLock<Option<HashMap<String, Room>>>,
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(Some(HashMap::new())),
        }
    }

    /// 初期ルームを登録した状態で作成（設定ファイルの permanent_rooms 用）
    pub fn with_rooms(rooms: impl IntoIterator<Item = Room>) -> Self {
        let rooms = rooms
            .into_iter()
            .map(|room| (room.id().to_string(), room))
            .collect();
        Self {
            rooms: RwLock::new(Some(rooms)),
        }
    }
}

impl Default for MemoryRoomStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomStore for MemoryRoomStore {
    fn put(&self, room: Room, allow_override: bool) -> Result<(), StoreError> {
        let mut guard = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        let rooms = guard.as_mut().ok_or(StoreError::Closed)?;
        if !allow_override && rooms.contains_key(room.id()) {
            return Err(StoreError::AlreadyExists(room.id().to_string()));
        }
        rooms.insert(room.id().to_string(), room);
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let mut guard = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        let rooms = guard.as_mut().ok_or(StoreError::Closed)?;
        Ok(rooms.remove(id).is_some())
    }

    fn get(&self, id: &str) -> Result<Option<Room>, StoreError> {
        let guard = self.rooms.read().unwrap_or_else(PoisonError::into_inner);
        let rooms = guard.as_ref().ok_or(StoreError::Closed)?;
        Ok(rooms.get(id).cloned())
    }

    fn close(&self) -> Result<(), StoreError> {
        self.rooms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}

impl TemporaryRoomStore for MemoryRoomStore {
    fn clean_expired(
        &self,
        now: i64,
        on_removed: &mut dyn FnMut(&Room),
    ) -> Result<Option<Room>, StoreError> {
        let removed: Vec<Room> = {
            let mut guard = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
            let rooms = guard.as_mut().ok_or(StoreError::Closed)?;
            let expired: Vec<String> = rooms
                .values()
                .filter(|room| room.expires_at().is_some_and(|until| until < now))
                .map(|room| room.id().to_string())
                .collect();
            expired.iter().filter_map(|id| rooms.remove(id)).collect()
        };

        for room in &removed {
            tracing::info!("Room '{}' expired", room.id());
            on_removed(room);
        }

        let guard = self.rooms.read().unwrap_or_else(PoisonError::into_inner);
        let rooms = guard.as_ref().ok_or(StoreError::Closed)?;
        Ok(rooms
            .values()
            .filter_map(|room| room.expires_at().map(|until| (until, room)))
            .min_by_key(|(until, _)| *until)
            .map(|(_, room)| room.clone()))
    }
}
