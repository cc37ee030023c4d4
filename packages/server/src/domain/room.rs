//! Room エンティティ
//!
//! ルームは ID、接続を許可するピア集合（空集合なら全員許可）、
//! ライフサイクル種別（Permanent / TimeWindow / Recurring）から成る。
//! 時刻はすべて unix 秒（`i64`）で扱う。
//!
//! 不変条件: `is_valid_at(now)` が false のとき `is_allowed_at(_, now)` も false。

use std::collections::BTreeSet;

use roomrelay_shared::time::unix_now;

use super::RoomError;

/// Lifecycle variant of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomKind {
    /// Lives until explicitly removed.
    Permanent,
    /// Admits peers between `valid_from` and `valid_until` (inclusive) and is
    /// swept from storage once `valid_until` has passed.
    TimeWindow { valid_from: i64, valid_until: i64 },
    /// Admits peers during `[first_occurrence + k * period, first_occurrence + k * period + duration]`.
    Recurring {
        first_occurrence: i64,
        period: i64,
        duration: i64,
    },
}

impl RoomKind {
    pub fn name(&self) -> &'static str {
        match self {
            RoomKind::Permanent => "permanent",
            RoomKind::TimeWindow { .. } => "time-window",
            RoomKind::Recurring { .. } => "recurring",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    id: String,
    allowed: BTreeSet<String>,
    kind: RoomKind,
}

impl Room {
    pub fn permanent(id: impl Into<String>, allowed: impl IntoIterator<Item = String>) -> Self {
        Self {
            id: id.into(),
            allowed: allowed.into_iter().collect(),
            kind: RoomKind::Permanent,
        }
    }

    /// # Errors
    ///
    /// `RoomError::InvalidDefinition` when `valid_from > valid_until`.
    pub fn time_window(
        id: impl Into<String>,
        allowed: impl IntoIterator<Item = String>,
        valid_from: i64,
        valid_until: i64,
    ) -> Result<Self, RoomError> {
        Self::new(
            id,
            allowed,
            RoomKind::TimeWindow {
                valid_from,
                valid_until,
            },
        )
    }

    /// # Errors
    ///
    /// `RoomError::InvalidDefinition` when `period <= 0` or `duration < 0`.
    pub fn recurring(
        id: impl Into<String>,
        allowed: impl IntoIterator<Item = String>,
        first_occurrence: i64,
        period: i64,
        duration: i64,
    ) -> Result<Self, RoomError> {
        Self::new(
            id,
            allowed,
            RoomKind::Recurring {
                first_occurrence,
                period,
                duration,
            },
        )
    }

    /// Build a room of any kind, validating the variant data.
    pub fn new(
        id: impl Into<String>,
        allowed: impl IntoIterator<Item = String>,
        kind: RoomKind,
    ) -> Result<Self, RoomError> {
        let id = id.into();
        if id.is_empty() {
            return Err(RoomError::InvalidDefinition("room id is empty".to_string()));
        }
        match kind {
            RoomKind::TimeWindow {
                valid_from,
                valid_until,
            } if valid_from > valid_until => {
                return Err(RoomError::InvalidDefinition(format!(
                    "room '{}' ends ({}) before it starts ({})",
                    id, valid_until, valid_from
                )));
            }
            RoomKind::Recurring { period, .. } if period <= 0 => {
                return Err(RoomError::InvalidDefinition(format!(
                    "room '{}' has a non-positive period {}",
                    id, period
                )));
            }
            RoomKind::Recurring { duration, .. } if duration < 0 => {
                return Err(RoomError::InvalidDefinition(format!(
                    "room '{}' has a negative duration {}",
                    id, duration
                )));
            }
            _ => {}
        }
        Ok(Self {
            id,
            allowed: allowed.into_iter().collect(),
            kind,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> RoomKind {
        self.kind
    }

    /// Permitted peers. Empty means everyone.
    pub fn allowed_peers(&self) -> &BTreeSet<String> {
        &self.allowed
    }

    pub fn is_allowed(&self, peer: &str) -> bool {
        self.is_allowed_at(peer, unix_now())
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(unix_now())
    }

    pub fn is_valid_at(&self, now: i64) -> bool {
        match self.kind {
            RoomKind::Permanent | RoomKind::Recurring { .. } => true,
            RoomKind::TimeWindow { valid_until, .. } => now <= valid_until,
        }
    }

    pub fn is_allowed_at(&self, peer: &str, now: i64) -> bool {
        if !self.is_valid_at(now) {
            return false;
        }
        if !self.allowed.is_empty() && !self.allowed.contains(peer) {
            return false;
        }
        match self.kind {
            RoomKind::Permanent => true,
            RoomKind::TimeWindow {
                valid_from,
                valid_until,
            } => valid_from <= now && now <= valid_until,
            RoomKind::Recurring {
                first_occurrence,
                period,
                duration,
            } => {
                // a window at least as long as the period never closes
                duration >= period
                    || (period > 0
                        && now >= first_occurrence
                        && (i128::from(now) - i128::from(first_occurrence))
                            .rem_euclid(i128::from(period))
                            <= i128::from(duration))
            }
        }
    }

    /// Expiry of a time-window room.
    pub fn expires_at(&self) -> Option<i64> {
        match self.kind {
            RoomKind::TimeWindow { valid_until, .. } => Some(valid_until),
            _ => None,
        }
    }

    /// Next instant at which connected peers must be re-checked, for recurring rooms.
    pub fn next_check_at(&self, now: i64) -> Option<i64> {
        match self.kind {
            RoomKind::Recurring {
                first_occurrence,
                period,
                duration,
            } => Some(next_recurring_deadline(
                first_occurrence,
                period,
                duration,
                now,
            )),
            _ => None,
        }
    }
}

/// End of the recurring window that is open at `now`, or of the next one.
///
/// Returns `i64::MAX` when windows overlap (`duration >= period`), since the
/// room never closes. Evaluating again at the returned instant yields the same
/// value; evaluating one second later yields the following window's end.
/// A deadline beyond the `i64` range is clamped to `i64::MAX`.
pub fn next_recurring_deadline(first: i64, period: i64, duration: i64, now: i64) -> i64 {
    if period <= 0 || duration >= period {
        return i64::MAX;
    }
    // widened so that timestamps near the i64 bounds cannot overflow
    let (first, period, now) = (i128::from(first), i128::from(period), i128::from(now));
    let first_end = first + i128::from(duration);
    let deadline = if now < first {
        first_end
    } else {
        let n = now - 1;
        n - (n - first_end).rem_euclid(period) + period
    };
    i64::try_from(deadline).unwrap_or(i64::MAX)
}
