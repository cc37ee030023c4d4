//! UseCase: 有効期限付きルームの管理
//!
//! `valid_until` を過ぎたルームはストアから削除され、残っていた接続も閉じられる。
//! タイマーは常に「最も早く期限切れになるルームの valid_until + 1 秒」に合わせる。

use std::sync::{Arc, Weak};

use roomrelay_shared::{scheduler::ScheduledCallback, time::unix_now};

use super::{
    ControllerError, RoomController,
    room_controller::{ControllerCore, SWEEP_RETRY_SECS, Sweep, schedule_sweep},
};
use crate::domain::{ClientConnection, Room, RoomKind, TemporaryRoomStore};

pub struct TimeWindowRoomController {
    core: ControllerCore<dyn TemporaryRoomStore>,
    expiry: ScheduledCallback,
    this: Weak<Self>,
}

impl TimeWindowRoomController {
    /// Create the controller and sweep rooms that expired while nothing was
    /// running (the store may be durable).
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(store: Arc<dyn TemporaryRoomStore>) -> Arc<Self> {
        let controller = Arc::new_cyclic(|this| Self {
            core: ControllerCore::new("time-window", store),
            expiry: ScheduledCallback::new(),
            this: this.clone(),
        });
        controller.sweep();
        controller
    }

    /// Unix second at which the next sweep runs.
    pub fn next_sweep_at(&self) -> Option<i64> {
        self.expiry.deadline().map(|deadline| deadline.timestamp())
    }

    fn sweep_locked(&self) {
        let now = unix_now();
        let mut expired = Vec::new();
        match self
            .core
            .store
            .clean_expired(now, &mut |room| expired.push(room.id().to_string()))
        {
            Ok(next) => {
                for id in &expired {
                    self.core.close_room_connections(id);
                }
                match next.and_then(|room| room.expires_at()) {
                    Some(until) => {
                        schedule_sweep(&self.expiry, &self.this, until.saturating_add(1), false)
                    }
                    None => self.expiry.cancel(),
                }
            }
            Err(e) => {
                tracing::error!("Failed to remove expired rooms: {}", e);
                schedule_sweep(&self.expiry, &self.this, now + SWEEP_RETRY_SECS, false);
            }
        }
    }
}

impl Sweep for TimeWindowRoomController {
    fn sweep(&self) {
        let _guard = self.core.lock();
        self.sweep_locked();
    }
}

impl RoomController for TimeWindowRoomController {
    fn get_room(&self, id: &str) -> Result<Option<Room>, ControllerError> {
        self.core.get_room(id)
    }

    fn add_room(&self, room: Room, allow_override: bool) -> Result<(), ControllerError> {
        self.core
            .ensure_kind(&room, |kind| matches!(kind, RoomKind::TimeWindow { .. }))?;
        let _guard = self.core.lock();
        self.core.store.put(room.clone(), allow_override)?;
        self.core.close_disallowed(&room, unix_now());
        if let Some(until) = room.expires_at() {
            schedule_sweep(&self.expiry, &self.this, until.saturating_add(1), true);
        }
        tracing::info!(
            "Room '{}' saved, valid until {}",
            room.id(),
            room.expires_at()
                .map(roomrelay_shared::time::unix_to_rfc3339)
                .unwrap_or_default()
        );
        Ok(())
    }

    fn close_and_remove_room(&self, id: &str) -> Result<bool, ControllerError> {
        let _guard = self.core.lock();
        let room = self.core.store.get(id)?;
        self.core.close_room_connections(id);
        let removed = self.core.store.remove(id)?;

        let drove_deadline = room
            .and_then(|room| room.expires_at())
            .map(|until| until.saturating_add(1))
            .is_some_and(|at| self.next_sweep_at() == Some(at));
        if removed && drove_deadline {
            self.sweep_locked();
        }
        Ok(removed)
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
        self.expiry.stop();
        self.core.close()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        domain::{ConnectionId, Outbound, RoomStore},
        infrastructure::repository::{MemoryRoomStore, RedbRoomStore},
    };

    // ========================================
    // テスト作業記録
    // ========================================
    // 【何をテストするか】
    // - 有効期間内だけ接続を受け付けること
    // - 期限切れ後に接続が閉じられ、ルームがストアから消えること
    // - タイマーが最も早い期限に合わせて設定・再設定されること
    // - 永続ストアに残っていた期限切れルームが起動時に削除されること
    // ========================================

    fn connection(room: &str, user: &str) -> (ClientConnection, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ClientConnection::new(ConnectionId::new(room, user).key(), tx), rx)
    }

    fn window(id: &str, from: i64, until: i64) -> Room {
        Room::time_window(id, Vec::new(), from, until).unwrap()
    }

    #[tokio::test]
    async fn test_admission_only_inside_window() {
        // テスト項目: 有効期間外のルームには接続できない
        // given (前提条件):
        let now = unix_now();
        let controller = TimeWindowRoomController::new(Arc::new(MemoryRoomStore::new()));
        controller.add_room(window("future", now + 100, now + 200), false).unwrap();
        controller.add_room(window("open", now - 10, now + 200), false).unwrap();
        let (early, _rx1) = connection("future", "alice");
        let (ok, _rx2) = connection("open", "alice");

        // when (操作):
        let early_ok = controller.new_connection_for_room("future", early);
        let open_ok = controller.new_connection_for_room("open", ok);

        // then (期待する結果):
        assert!(!early_ok);
        assert!(open_ok);
        controller.close().unwrap();
    }

    #[tokio::test]
    async fn test_timer_tracks_earliest_expiry() {
        // テスト項目: タイマーは最も早い valid_until + 1 に設定され、そのルームを削除すると次に移る
        // given (前提条件):
        let now = unix_now();
        let controller = TimeWindowRoomController::new(Arc::new(MemoryRoomStore::new()));

        // when (操作):
        controller.add_room(window("late", now, now + 500), false).unwrap();
        let after_late = controller.next_sweep_at();
        controller.add_room(window("soon", now, now + 100), false).unwrap();
        let after_soon = controller.next_sweep_at();
        controller.add_room(window("later", now, now + 900), false).unwrap();
        let after_later = controller.next_sweep_at();
        controller.close_and_remove_room("soon").unwrap();
        let after_remove = controller.next_sweep_at();

        // then (期待する結果):
        assert_eq!(after_late, Some(now + 501));
        assert_eq!(after_soon, Some(now + 101));
        assert_eq!(after_later, Some(now + 101));
        assert_eq!(after_remove, Some(now + 501));
        controller.close().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_expired_room_is_swept_and_connections_closed() {
        // テスト項目: 期限切れ後に接続が閉じられ、ルームがストアから削除される
        // given (前提条件):
        let now = unix_now();
        let store = Arc::new(MemoryRoomStore::new());
        let controller = TimeWindowRoomController::new(store.clone());
        controller.add_room(window("short", now - 5, now), false).unwrap();
        let (alice, mut alice_rx) = connection("short", "alice");
        // the window may already be over if the clock ticked; only check the sweep then
        let admitted = controller.new_connection_for_room("short", alice);

        // when (操作):
        let deadline = std::time::Instant::now() + Duration::from_secs(4);
        while store.get("short").unwrap().is_some() && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        // then (期待する結果):
        assert!(store.get("short").unwrap().is_none());
        if admitted {
            assert_eq!(alice_rx.recv().await, Some(Outbound::Close));
        }
        assert_eq!(controller.next_sweep_at(), None);
        controller.close().unwrap();
    }

    #[tokio::test]
    async fn test_startup_sweeps_persisted_rooms() {
        // テスト項目: 起動時に、停止中に期限切れになったルームが削除され、残りに合わせてタイマーが設定される
        // given (前提条件):
        let now = unix_now();
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RedbRoomStore::open(dir.path().join("rooms.redb")).unwrap());
        store.put(window("stale", now - 100, now - 50), false).unwrap();
        store.put(window("fresh", now - 100, now + 300), false).unwrap();

        // when (操作):
        let controller = TimeWindowRoomController::new(store.clone());

        // then (期待する結果):
        assert!(store.get("stale").unwrap().is_none());
        assert!(store.get("fresh").unwrap().is_some());
        assert_eq!(controller.next_sweep_at(), Some(now + 301));
        controller.close().unwrap();
    }

    #[tokio::test]
    async fn test_permanent_room_is_rejected() {
        // テスト項目: 期限付き以外のルームは UnsupportedRoomKind で拒否される
        // given (前提条件):
        let controller = TimeWindowRoomController::new(Arc::new(MemoryRoomStore::new()));

        // when (操作):
        let result = controller.add_room(Room::permanent("lobby", Vec::new()), false);

        // then (期待する結果):
        assert!(matches!(result, Err(ControllerError::UnsupportedRoomKind { .. })));
        controller.close().unwrap();
    }
}
