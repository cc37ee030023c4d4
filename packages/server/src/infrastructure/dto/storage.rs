//! Persisted room record and its conversion to and from the `Room` entity.
//!
//! The record carries the id and the variant timing fields. Permitted peers
//! are stored next to it (one entry per peer) and joined back in `into_room`.

use serde::{Deserialize, Serialize};

use crate::domain::{Room, RoomKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoredRoomKind {
    Permanent,
    TimeWindow {
        valid_from: i64,
        valid_until: i64,
    },
    Recurring {
        first_occurrence: i64,
        period: i64,
        duration: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRoom {
    pub id: String,
    #[serde(flatten)]
    pub kind: StoredRoomKind,
}

// ========================================
// Domain Entity → DTO
// ========================================

impl From<&Room> for StoredRoom {
    fn from(room: &Room) -> Self {
        let kind = match room.kind() {
            RoomKind::Permanent => StoredRoomKind::Permanent,
            RoomKind::TimeWindow {
                valid_from,
                valid_until,
            } => StoredRoomKind::TimeWindow {
                valid_from,
                valid_until,
            },
            RoomKind::Recurring {
                first_occurrence,
                period,
                duration,
            } => StoredRoomKind::Recurring {
                first_occurrence,
                period,
                duration,
            },
        };
        Self {
            id: room.id().to_string(),
            kind,
        }
    }
}

// ========================================
// DTO → Domain Entity
// ========================================

impl StoredRoom {
    pub fn into_room(
        self,
        allowed: impl IntoIterator<Item = String>,
    ) -> Result<Room, crate::domain::RoomError> {
        let kind = match self.kind {
            StoredRoomKind::Permanent => RoomKind::Permanent,
            StoredRoomKind::TimeWindow {
                valid_from,
                valid_until,
            } => RoomKind::TimeWindow {
                valid_from,
                valid_until,
            },
            StoredRoomKind::Recurring {
                first_occurrence,
                period,
                duration,
            } => RoomKind::Recurring {
                first_occurrence,
                period,
                duration,
            },
        };
        Room::new(self.id, allowed, kind)
    }
}
