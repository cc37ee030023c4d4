//! WebSocket message envelope: `{"type": string, "data": object}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::ProtocolError;

/// Type of the reply sent when a forwarding target is missing.
pub const ERROR_MESSAGE_TYPE: &str = "error";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Envelope {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// Payload of an `error` reply.
pub fn peer_not_found(request_type: &str, reason: String) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert("requestType".to_string(), Value::from(request_type));
    data.insert("reason".to_string(), Value::from(reason));
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_envelope() {
        // テスト項目: type と data を持つ JSON をエンベロープとして解析できる
        // given (前提条件):
        let text = r#"{"type":"offer","data":{"to":"bob","sdp":"v=0"}}"#;

        // when (操作):
        let envelope = Envelope::parse(text).unwrap();

        // then (期待する結果):
        assert_eq!(envelope.message_type, "offer");
        assert_eq!(envelope.data["to"], "bob");
    }

    #[test]
    fn test_parse_rejects_non_object_data_and_garbage() {
        // テスト項目: data がオブジェクトでない、または JSON でない入力は Malformed
        // given (前提条件):
        let inputs = [r#"{"type":"offer","data":[1,2]}"#, "hello", r#"{"data":{}}"#];

        for input in inputs {
            // when (操作):
            let result = Envelope::parse(input);

            // then (期待する結果):
            assert!(matches!(result, Err(ProtocolError::Malformed(_))), "{}", input);
        }
    }
}
