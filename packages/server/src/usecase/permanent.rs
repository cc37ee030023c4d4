//! UseCase: 常設ルームの管理
//!
//! 常設ルームは削除されるまで有効。許可リストの変更時だけ接続を見直す。

use std::sync::Arc;

use roomrelay_shared::time::unix_now;

use super::{ControllerError, RoomController, room_controller::ControllerCore};
use crate::domain::{ClientConnection, Room, RoomKind, RoomStore};

/// 常設ルームのコントローラ（設定ファイルと HTTP 管理 API から編集される）
pub struct PermanentRoomController {
    core: ControllerCore<dyn RoomStore>,
}

impl PermanentRoomController {
    pub fn new(store: Arc<dyn RoomStore>) -> Self {
        Self {
            core: ControllerCore::new("permanent", store),
        }
    }
}

impl RoomController for PermanentRoomController {
    fn get_room(&self, id: &str) -> Result<Option<Room>, ControllerError> {
        self.core.get_room(id)
    }

    fn add_room(&self, room: Room, allow_override: bool) -> Result<(), ControllerError> {
        self.core
            .ensure_kind(&room, |kind| matches!(kind, RoomKind::Permanent))?;
        let _guard = self.core.lock();
        self.core.store.put(room.clone(), allow_override)?;
        self.core.close_disallowed(&room, unix_now());
        tracing::info!("Room '{}' saved ({} allowed peer(s))", room.id(), room.allowed_peers().len());
        Ok(())
    }

    fn close_and_remove_room(&self, id: &str) -> Result<bool, ControllerError> {
        let _guard = self.core.lock();
        self.core.close_room_connections(id);
        Ok(self.core.store.remove(id)?)
    }

    fn is_connected(&self, room: &str, user: &str) -> bool {
        self.core.connections.is_connected(room, user)
    }

    fn new_connection_for_room(&self, room: &str, conn: ClientConnection) -> bool {
        let _guard = self.core.lock();
        self.core.admit(room, conn, unix_now()).is_some()
    }

    fn connection_closed(&self, room: &str, user: &str) -> Option<ClientConnection> {
        self.core.connection_closed(room, user)
    }

    fn get_connection_in_room(&self, room: &str, user: &str) -> Option<ClientConnection> {
        self.core.connections.get_connection_in_room(room, user)
    }

    fn close(&self) -> Result<(), ControllerError> {
        self.core.close()
    }
}
