//! ルームごとの接続レジストリ
//!
//! ルーム ID → `ConnectionRegistry`。最初の接続でサブレジストリを作り、
//! 最後の接続が外れたときに削除する。
//!
//! 追加は外側の読み取りロックの下で行う。削除側はサブレジストリを消すときに
//! 書き込みロックを取り、空であることを再確認するので、追加した接続が
//! 削除済みのサブレジストリに取り残されることはない。

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use super::ConnectionRegistry;
use crate::domain::{ClientConnection, ConnectionError, ConnectionId};

#[derive(Debug, Default)]
pub struct RoomConnectionRegistry {
    rooms: RwLock<HashMap<String, Arc<ConnectionRegistry>>>,
}

impl RoomConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `conn` in `room`. Returns false when its id is already connected.
    pub fn add_connection_in_room(&self, room: &str, conn: ClientConnection) -> bool {
        {
            let rooms = self.rooms.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(registry) = rooms.get(room) {
                return registry.add_if_absent(conn);
            }
        }
        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        rooms
            .entry(room.to_string())
            .or_default()
            .add_if_absent(conn)
    }

    pub fn remove_connection_in_room(&self, room: &str, user: &str) -> Option<ClientConnection> {
        let key = ConnectionId::new(room, user).key();
        let removed = {
            let rooms = self.rooms.read().unwrap_or_else(PoisonError::into_inner);
            let registry = rooms.get(room)?;
            let removed = registry.remove(&key);
            if !registry.is_empty() {
                return removed;
            }
            removed
        };

        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        if rooms.get(room).is_some_and(|registry| registry.is_empty()) {
            rooms.remove(room);
            tracing::debug!("Room '{}' has no connections left", room);
        }
        removed
    }

    pub fn get_connection_in_room(&self, room: &str, user: &str) -> Option<ClientConnection> {
        self.registry(room)?
            .get(&ConnectionId::new(room, user).key())
    }

    pub fn is_connected(&self, room: &str, user: &str) -> bool {
        self.registry(room)
            .is_some_and(|registry| registry.is_connected(&ConnectionId::new(room, user).key()))
    }

    pub fn has_connections(&self, room: &str) -> bool {
        self.registry(room)
            .is_some_and(|registry| !registry.is_empty())
    }

    /// Call `f` for every connection in `room`, without holding any lock.
    pub fn for_each_in(&self, room: &str, f: impl FnMut(&ClientConnection)) {
        if let Some(registry) = self.registry(room) {
            registry.for_each(f);
        }
    }

    /// Rooms that currently have a sub-registry.
    pub fn room_ids(&self) -> Vec<String> {
        self.rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn close_all_in_room(&self, room: &str) -> (usize, Option<ConnectionError>) {
        match self.registry(room) {
            Some(registry) => registry.close_all(),
            None => (0, None),
        }
    }

    pub fn close_all_connections(&self) -> (usize, Option<ConnectionError>) {
        let registries: Vec<_> = self
            .rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut total = 0;
        let mut last_error = None;
        for registry in registries {
            let (count, error) = registry.close_all();
            total += count;
            if error.is_some() {
                last_error = error;
            }
        }
        (total, last_error)
    }

    fn registry(&self, room: &str) -> Option<Arc<ConnectionRegistry>> {
        self.rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(room)
            .cloned()
    }
}
