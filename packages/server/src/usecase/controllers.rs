//! 複数のコントローラを優先順に束ねる
//!
//! 先に登録したコントローラが優先される。問い合わせは最初に肯定的な答えを
//! 返したコントローラの結果を使う。ルームの追加は種別ごとのコントローラに
//! 直接行うので、ここには `add_room` はない。

use std::sync::Arc;

use super::{ControllerError, RoomController};
use crate::domain::{ClientConnection, Room};

#[derive(Clone, Default)]
pub struct RoomControllers {
    controllers: Vec<Arc<dyn RoomController>>,
}

impl RoomControllers {
    pub fn new(controllers: Vec<Arc<dyn RoomController>>) -> Self {
        Self { controllers }
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    /// First controller that knows the room wins. An error is only returned
    /// when no controller found the room.
    pub fn get_room(&self, id: &str) -> Result<Option<Room>, ControllerError> {
        let mut last_error = None;
        for controller in &self.controllers {
            match controller.get_room(id) {
                Ok(Some(room)) => return Ok(Some(room)),
                Ok(None) => {}
                Err(e) => last_error = Some(e),
            }
        }
        match last_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    pub fn close_and_remove_room(&self, id: &str) -> Result<bool, ControllerError> {
        let mut last_error = None;
        for controller in &self.controllers {
            match controller.close_and_remove_room(id) {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) => last_error = Some(e),
            }
        }
        match last_error {
            Some(e) => Err(e),
            None => Ok(false),
        }
    }

    pub fn is_connected(&self, room: &str, user: &str) -> bool {
        self.controllers
            .iter()
            .any(|controller| controller.is_connected(room, user))
    }

    /// Stops at the first controller that admits the connection.
    pub fn new_connection_for_room(&self, room: &str, conn: &ClientConnection) -> bool {
        self.controllers
            .iter()
            .any(|controller| controller.new_connection_for_room(room, conn.clone()))
    }

    pub fn connection_closed(&self, room: &str, user: &str) -> Option<ClientConnection> {
        self.controllers
            .iter()
            .find_map(|controller| controller.connection_closed(room, user))
    }

    pub fn get_connection_in_room(&self, room: &str, user: &str) -> Option<ClientConnection> {
        self.controllers
            .iter()
            .find_map(|controller| controller.get_connection_in_room(room, user))
    }

    /// Close every controller, returning the last error.
    pub fn close(&self) -> Result<(), ControllerError> {
        let mut result = Ok(());
        for controller in &self.controllers {
            if let Err(e) = controller.close() {
                tracing::error!("Failed to close room controller: {}", e);
                result = Err(e);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        domain::{ConnectionId, MockRoomStore, Outbound, StoreError},
        infrastructure::repository::MemoryRoomStore,
        usecase::PermanentRoomController,
    };

    fn connection(room: &str, user: &str) -> (ClientConnection, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ClientConnection::new(ConnectionId::new(room, user).key(), tx), rx)
    }

    fn permanent(rooms: Vec<Room>) -> Arc<dyn RoomController> {
        Arc::new(PermanentRoomController::new(Arc::new(
            MemoryRoomStore::with_rooms(rooms),
        )))
    }

    #[test]
    fn test_first_controller_takes_precedence() {
        // テスト項目: 同じ ID のルームがあれば先に登録したコントローラが優先される
        // given (前提条件):
        let first = permanent(vec![Room::permanent("shared", vec!["alice".to_string()])]);
        let second = permanent(vec![
            Room::permanent("shared", Vec::new()),
            Room::permanent("only-second", Vec::new()),
        ]);
        let controllers = RoomControllers::new(vec![first.clone(), second.clone()]);

        // when (操作):
        let shared = controllers.get_room("shared").unwrap().unwrap();
        let only_second = controllers.get_room("only-second").unwrap();
        let missing = controllers.get_room("missing").unwrap();

        // then (期待する結果):
        assert_eq!(shared.allowed_peers().len(), 1);
        assert!(only_second.is_some());
        assert!(missing.is_none());
    }

    #[test]
    fn test_connection_lands_in_owning_controller() {
        // テスト項目: 接続はルームを持つコントローラに登録され、切断もそこに届く
        // given (前提条件):
        let first = permanent(vec![Room::permanent("a", Vec::new())]);
        let second = permanent(vec![Room::permanent("b", Vec::new())]);
        let controllers = RoomControllers::new(vec![first.clone(), second.clone()]);
        let (conn, _rx) = connection("b", "alice");

        // when (操作):
        let admitted = controllers.new_connection_for_room("b", &conn);

        // then (期待する結果):
        assert!(admitted);
        assert!(!first.is_connected("b", "alice"));
        assert!(second.is_connected("b", "alice"));
        assert!(controllers.get_connection_in_room("b", "alice").is_some());
        assert!(controllers.connection_closed("b", "alice").is_some());
        assert!(!controllers.is_connected("b", "alice"));
    }

    #[test]
    fn test_remove_tries_every_controller() {
        // テスト項目: 削除は最初に見つかったコントローラで行われ、どこにもなければ false
        // given (前提条件):
        let controllers = RoomControllers::new(vec![
            permanent(vec![Room::permanent("a", Vec::new())]),
            permanent(vec![Room::permanent("b", Vec::new())]),
        ]);

        // when (操作):
        let removed = controllers.close_and_remove_room("b").unwrap();
        let missing = controllers.close_and_remove_room("b").unwrap();

        // then (期待する結果):
        assert!(removed);
        assert!(!missing);
    }

    #[test]
    fn test_errors_only_surface_without_answer() {
        // テスト項目: 失敗したコントローラがあっても、他が答えればその結果を返す
        // given (前提条件):
        let mut broken = MockRoomStore::new();
        broken
            .expect_get()
            .returning(|_| Err(StoreError::Backend("io".to_string())));
        broken
            .expect_close()
            .returning(|| Err(StoreError::Backend("io".to_string())));
        let broken: Arc<dyn RoomController> =
            Arc::new(PermanentRoomController::new(Arc::new(broken)));
        let healthy = permanent(vec![Room::permanent("a", Vec::new())]);
        let controllers = RoomControllers::new(vec![broken, healthy]);

        // when (操作):
        let found = controllers.get_room("a");
        let missing = controllers.get_room("zzz");
        let closed = controllers.close();

        // then (期待する結果):
        assert!(found.unwrap().is_some());
        assert!(missing.is_err());
        assert_eq!(
            closed,
            Err(ControllerError::Store(StoreError::Backend("io".to_string())))
        );
    }
}
