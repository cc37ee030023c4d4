//! Connection identity and the handle used to push frames to a live client.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use super::ConnectionError;

/// (room, user) pair identifying a room-scoped connection.
///
/// Its canonical string form `{"r":"<room>","u":"<user>"}` is both the
/// registry key and the external connection id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId {
    #[serde(rename = "r")]
    pub room: String,
    #[serde(rename = "u")]
    pub user: String,
}

impl ConnectionId {
    pub fn new(room: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            user: user.into(),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ConnectionError> {
        serde_json::from_str(raw).map_err(|e| ConnectionError::InvalidId(e.to_string()))
    }

    pub fn key(&self) -> String {
        serde_json::json!({ "r": self.room, "u": self.user }).to_string()
    }
}

/// Frames queued for the connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close,
}

/// Channel the writer task drains. It is the only path to the socket.
pub type OutboundSender = mpsc::UnboundedSender<Outbound>;

/// Cheap-to-clone handle to a live connection.
#[derive(Debug, Clone)]
pub struct ClientConnection {
    id: String,
    outbound: OutboundSender,
}

impl ClientConnection {
    pub fn new(id: impl Into<String>, outbound: OutboundSender) -> Self {
        Self {
            id: id.into(),
            outbound,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn send_raw(&self, text: impl Into<String>) -> Result<(), ConnectionError> {
        self.outbound
            .send(Outbound::Text(text.into()))
            .map_err(|_| ConnectionError::Closed(self.id.clone()))
    }

    /// Send a `{"type": ..., "data": ...}` envelope.
    pub fn send_typed(
        &self,
        message_type: &str,
        data: &Map<String, Value>,
    ) -> Result<(), ConnectionError> {
        let envelope = serde_json::json!({ "type": message_type, "data": data });
        self.send_raw(envelope.to_string())
    }

    /// Ask the writer task to send a close frame and stop.
    pub fn close(&self) -> Result<(), ConnectionError> {
        self.outbound
            .send(Outbound::Close)
            .map_err(|_| ConnectionError::Closed(self.id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_canonical_form() {
        // テスト項目: ConnectionId が {"r":..,"u":..} 形式でシリアライズされ、復元できる
        // given (前提条件):
        let id = ConnectionId::new("room-1", "alice");

        // when (操作):
        let key = id.key();
        let parsed = ConnectionId::parse(&key).unwrap();

        // then (期待する結果):
        assert_eq!(key, r#"{"r":"room-1","u":"alice"}"#);
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_connection_id_parse_rejects_garbage() {
        // テスト項目: 不正な文字列は InvalidId エラーになる
        // given (前提条件):
        let raw = "alice";

        // when (操作):
        let result = ConnectionId::parse(raw);

        // then (期待する結果):
        assert!(matches!(result, Err(ConnectionError::InvalidId(_))));
    }

    #[test]
    fn test_send_typed_and_close_reach_the_channel() {
        // テスト項目: send_typed / close がキューに積まれ、受信側が消えるとエラーになる
        // given (前提条件):
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = ClientConnection::new("c1", tx);
        let mut data = Map::new();
        data.insert("sdp".to_string(), Value::from("x"));

        // when (操作):
        conn.send_typed("offer", &data).unwrap();
        conn.close().unwrap();

        // then (期待する結果):
        let Some(Outbound::Text(text)) = rx.try_recv().ok() else {
            panic!("expected a text frame");
        };
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "offer");
        assert_eq!(value["data"]["sdp"], "x");
        assert_eq!(rx.try_recv().ok(), Some(Outbound::Close));

        drop(rx);
        assert!(matches!(conn.send_raw("late"), Err(ConnectionError::Closed(_))));
    }
}
