//! RoomController trait と各コントローラ共通の処理
//!
//! コントローラはルームストアとルームごとの接続レジストリを束ね、
//! 接続の受付・ルーム編集・期限切れ処理を行う。
//!
//! ```text
//! Unregistered --add_room--> Registered(valid)
//! Registered(valid) --時間経過--> Registered(invalid, sweep 待ち)
//! Registered(*) --close_and_remove_room / sweep--> Unregistered
//! ```
//!
//! 編集・受付・sweep は `ControllerCore::lock` で直列化する。sweep が
//! 並行する編集で設定された期限を上書きすることはない。

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use roomrelay_shared::{scheduler::ScheduledCallback, time::unix_to_datetime};

use super::ControllerError;
use crate::{
    domain::{ClientConnection, ConnectionId, Room, RoomKind, RoomStore},
    infrastructure::registry::RoomConnectionRegistry,
};

/// Seconds before a failed sweep is retried.
pub(super) const SWEEP_RETRY_SECS: i64 = 5;

/// ルームの種類ごとのライフサイクルを管理するコントローラ
pub trait RoomController: Send + Sync {
    fn get_room(&self, id: &str) -> Result<Option<Room>, ControllerError>;

    /// ルームを追加（`allow_override` が true なら置き換え）し、新しい定義で
    /// 許可されなくなった接続を閉じる。
    fn add_room(&self, room: Room, allow_override: bool) -> Result<(), ControllerError>;

    /// ルーム内の全接続を閉じてからストアから削除する。存在しなければ `Ok(false)`。
    fn close_and_remove_room(&self, id: &str) -> Result<bool, ControllerError>;

    fn is_connected(&self, room: &str, user: &str) -> bool;

    /// 接続を受け付ける。false のとき呼び出し側が接続を閉じる。
    fn new_connection_for_room(&self, room: &str, conn: ClientConnection) -> bool;

    fn connection_closed(&self, room: &str, user: &str) -> Option<ClientConnection>;

    fn get_connection_in_room(&self, room: &str, user: &str) -> Option<ClientConnection>;

    /// タイマーを止め、全接続を閉じ、ストアを閉じる。最後のエラーを返す。
    fn close(&self) -> Result<(), ControllerError>;
}

/// ストア + 接続レジストリ + 直列化用ロック
pub(super) struct ControllerCore<S: ?Sized> {
    pub(super) name: &'static str,
    pub(super) store: Arc<S>,
    pub(super) connections: RoomConnectionRegistry,
    lock: Mutex<()>,
}

impl<S: RoomStore + ?Sized> ControllerCore<S> {
    pub(super) fn new(name: &'static str, store: Arc<S>) -> Self {
        Self {
            name,
            store,
            connections: RoomConnectionRegistry::new(),
            lock: Mutex::new(()),
        }
    }

    pub(super) fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn ensure_kind(
        &self,
        room: &Room,
        accepts: fn(&RoomKind) -> bool,
    ) -> Result<(), ControllerError> {
        if accepts(&room.kind()) {
            return Ok(());
        }
        Err(ControllerError::UnsupportedRoomKind {
            controller: self.name,
            actual: room.kind().name(),
            room: room.id().to_string(),
        })
    }

    pub(super) fn get_room(&self, id: &str) -> Result<Option<Room>, ControllerError> {
        Ok(self.store.get(id)?)
    }

    /// Admission check at `now`. Returns the room when the connection was registered.
    pub(super) fn admit(&self, room_id: &str, conn: ClientConnection, now: i64) -> Option<Room> {
        let user = match ConnectionId::parse(conn.id()) {
            Ok(id) => id.user,
            Err(e) => {
                tracing::warn!("Rejecting connection '{}': {}", conn.id(), e);
                return None;
            }
        };
        let room = match self.store.get(room_id) {
            Ok(Some(room)) => room,
            Ok(None) => {
                tracing::debug!("Room '{}' is not managed by the {} controller", room_id, self.name);
                return None;
            }
            Err(e) => {
                tracing::error!("Failed to load room '{}': {}", room_id, e);
                return None;
            }
        };
        if !room.is_allowed_at(&user, now) {
            tracing::warn!("User '{}' is not allowed in room '{}' now", user, room_id);
            return None;
        }
        if !self.connections.add_connection_in_room(room_id, conn) {
            tracing::warn!("User '{}' is already connected to room '{}'", user, room_id);
            return None;
        }
        tracing::info!("User '{}' joined room '{}'", user, room_id);
        Some(room)
    }

    /// Close every connection in `room` whose user is no longer allowed at `now`.
    pub(super) fn close_disallowed(&self, room: &Room, now: i64) -> usize {
        let mut closed = 0;
        self.connections.for_each_in(room.id(), |conn| {
            let allowed = ConnectionId::parse(conn.id())
                .map(|id| room.is_allowed_at(&id.user, now))
                .unwrap_or(false);
            if allowed {
                return;
            }
            closed += 1;
            if let Err(e) = conn.close() {
                tracing::warn!("Failed to close connection '{}': {}", conn.id(), e);
            }
        });
        if closed > 0 {
            tracing::info!("Closed {} connection(s) no longer allowed in room '{}'", closed, room.id());
        }
        closed
    }

    pub(super) fn close_room_connections(&self, room: &str) {
        let (count, error) = self.connections.close_all_in_room(room);
        if count > 0 {
            tracing::info!("Closed {} connection(s) in room '{}'", count, room);
        }
        if let Some(e) = error {
            tracing::warn!("Failed to close a connection in room '{}': {}", room, e);
        }
    }

    pub(super) fn connection_closed(&self, room: &str, user: &str) -> Option<ClientConnection> {
        let removed = self.connections.remove_connection_in_room(room, user);
        if removed.is_some() {
            tracing::info!("User '{}' left room '{}'", user, room);
        }
        removed
    }

    /// Close every connection and then the store, keeping the last error.
    pub(super) fn close(&self) -> Result<(), ControllerError> {
        let (count, connection_error) = self.connections.close_all_connections();
        tracing::info!("Closing {} controller ({} connection(s))", self.name, count);
        let store_result = self.store.close();
        match (store_result, connection_error) {
            (Err(e), _) => Err(e.into()),
            (Ok(()), Some(e)) => Err(e.into()),
            (Ok(()), None) => Ok(()),
        }
    }
}

/// Re-evaluated when the controller's timer fires.
pub(super) trait Sweep: Send + Sync + 'static {
    fn sweep(&self);
}

/// Arm `expiry` to sweep `controller` at unix second `at`.
///
/// `i64::MAX` means "never" and leaves the timer untouched. With
/// `only_if_earlier`, an earlier pending deadline is kept.
pub(super) fn schedule_sweep<C: Sweep>(
    expiry: &ScheduledCallback,
    controller: &Weak<C>,
    at: i64,
    only_if_earlier: bool,
) {
    if at == i64::MAX {
        return;
    }
    let Some(deadline) = unix_to_datetime(at) else {
        tracing::warn!("Sweep time {} is out of range, not scheduling", at);
        return;
    };
    let controller = controller.clone();
    let callback = move || {
        if let Some(controller) = controller.upgrade() {
            controller.sweep();
        }
    };
    if only_if_earlier {
        expiry.call_back_if_earlier(deadline, callback);
    } else {
        expiry.call_back_at(deadline, callback);
    }
}
