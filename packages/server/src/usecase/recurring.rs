//! UseCase: 定期開催ルームの管理
//!
//! 定期ルームはストアから消えないが、ウィンドウの外では接続を受け付けない。
//! 接続中のピアがいるルームについて、現在のウィンドウの終わり + 1 秒に
//! タイマーを設定し、その時点で許可されなくなった接続を閉じる。

use std::sync::{Arc, Weak};

use roomrelay_shared::{scheduler::ScheduledCallback, time::unix_now};

use super::{
    ControllerError, RoomController,
    room_controller::{ControllerCore, SWEEP_RETRY_SECS, Sweep, schedule_sweep},
};
use crate::domain::{ClientConnection, Room, RoomKind, RoomStore};

pub struct RecurringRoomController {
    core: ControllerCore<dyn RoomStore>,
    expiry: ScheduledCallback,
    this: Weak<Self>,
}

impl RecurringRoomController {
    /// Must be called inside a Tokio runtime.
    pub fn new(store: Arc<dyn RoomStore>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            core: ControllerCore::new("recurring", store),
            expiry: ScheduledCallback::new(),
            this: this.clone(),
        })
    }

    /// Unix second at which connected peers are re-checked next.
    pub fn next_sweep_at(&self) -> Option<i64> {
        self.expiry.deadline().map(|deadline| deadline.timestamp())
    }

    fn sweep_locked(&self) {
        let now = unix_now();
        let mut next: Option<i64> = None;
        for room_id in self.core.connections.room_ids() {
            match self.core.store.get(&room_id) {
                Ok(Some(room)) => {
                    self.core.close_disallowed(&room, now);
                    if let Some(at) = room.next_check_at(now) {
                        next = Some(next.map_or(at, |current| current.min(at)));
                    }
                }
                Ok(None) => {
                    tracing::info!("Room '{}' no longer exists", room_id);
                    self.core.close_room_connections(&room_id);
                }
                Err(e) => {
                    tracing::error!("Failed to load room '{}': {}", room_id, e);
                    let retry = now + SWEEP_RETRY_SECS - 1;
                    next = Some(next.map_or(retry, |current| current.min(retry)));
                }
            }
        }
        match next {
            Some(at) if at != i64::MAX => {
                schedule_sweep(&self.expiry, &self.this, at.saturating_add(1), false)
            }
            _ => self.expiry.cancel(),
        }
    }
}

impl Sweep for RecurringRoomController {
    fn sweep(&self) {
        let _guard = self.core.lock();
        self.sweep_locked();
    }
}

impl RoomController for RecurringRoomController {
    fn get_room(&self, id: &str) -> Result<Option<Room>, ControllerError> {
        self.core.get_room(id)
    }

    fn add_room(&self, room: Room, allow_override: bool) -> Result<(), ControllerError> {
        self.core
            .ensure_kind(&room, |kind| matches!(kind, RoomKind::Recurring { .. }))?;
        let _guard = self.core.lock();
        self.core.store.put(room.clone(), allow_override)?;
        let now = unix_now();
        self.core.close_disallowed(&room, now);
        if self.core.connections.has_connections(room.id())
            && let Some(at) = room.next_check_at(now)
        {
            schedule_sweep(&self.expiry, &self.this, at.saturating_add(1), true);
        }
        tracing::info!("Room '{}' saved", room.id());
        Ok(())
    }

    fn close_and_remove_room(&self, id: &str) -> Result<bool, ControllerError> {
        let _guard = self.core.lock();
        self.core.close_room_connections(id);
        let removed = self.core.store.remove(id)?;
        if removed {
            self.sweep_locked();
        }
        Ok(removed)
    }

    fn is_connected(&self, room: &str, user: &str) -> bool {
        self.core.connections.is_connected(room, user)
    }

    fn new_connection_for_room(&self, room: &str, conn: ClientConnection) -> bool {
        let _guard = self.core.lock();
        let now = unix_now();
        let Some(admitted) = self.core.admit(room, conn, now) else {
            return false;
        };
        if let Some(at) = admitted.next_check_at(now) {
            schedule_sweep(&self.expiry, &self.this, at.saturating_add(1), true);
        }
        true
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
