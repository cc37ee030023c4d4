//! Server configuration file.
//!
//! ```json
//! {
//!   "relay_route": "/signal",
//!   "message_types": ["offer", "answer", "candidate"],
//!   "permanent_rooms": [{ "id": "lobby", "allowed_clients": ["alice", "bob"] }],
//!   "admin": {
//!     "time_window": { "prefix": "/rooms/temp", "db_path": "temp-rooms.redb" }
//!   }
//! }
//! ```
//!
//! Every field is optional. A route group without `db_path` keeps its rooms
//! in memory. In direct mode a non-empty `passwords` map (user id to
//! password) makes every peer present a matching `password` parameter.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;

use crate::ui::relay::{DEFAULT_MESSAGE_TYPES, DEFAULT_PING_INTERVAL};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PermanentRoomConfig {
    pub id: String,
    #[serde(default)]
    pub allowed_clients: Vec<String>,
}

/// One admin route group (`<prefix>/add`, `/edit`, `/remove`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RouteGroupConfig {
    pub prefix: Option<String>,
    /// redb file backing this group's rooms
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub permanent: RouteGroupConfig,
    pub time_window: RouteGroupConfig,
    pub recurring: RouteGroupConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub relay_route: String,
    pub message_types: Vec<String>,
    /// Seconds between liveness pings; 0 disables them.
    pub ping_interval_secs: u64,
    pub permanent_rooms: Vec<PermanentRoomConfig>,
    pub admin: AdminConfig,
    /// Direct mode credentials
    pub passwords: BTreeMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            relay_route: "/signal".to_string(),
            message_types: DEFAULT_MESSAGE_TYPES.iter().map(|t| t.to_string()).collect(),
            ping_interval_secs: DEFAULT_PING_INTERVAL.as_secs(),
            permanent_rooms: Vec::new(),
            admin: AdminConfig::default(),
            passwords: BTreeMap::new(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        // テスト項目: 省略した項目は既定値になる
        // given (前提条件):
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"permanent_rooms":[{{"id":"lobby","allowed_clients":["alice"]}}],
               "admin":{{"time_window":{{"db_path":"temp.redb"}}}}}}"#
        )
        .unwrap();

        // when (操作):
        let config = ServerConfig::load(file.path()).unwrap();

        // then (期待する結果):
        assert_eq!(config.relay_route, "/signal");
        assert_eq!(config.message_types, vec!["offer", "answer", "candidate"]);
        assert_eq!(config.ping_interval_secs, 66);
        assert_eq!(
            config.permanent_rooms,
            vec![PermanentRoomConfig {
                id: "lobby".to_string(),
                allowed_clients: vec!["alice".to_string()],
            }]
        );
        assert_eq!(
            config.admin.time_window.db_path,
            Some(PathBuf::from("temp.redb"))
        );
        assert_eq!(config.admin.recurring, RouteGroupConfig::default());
    }

    #[test]
    fn test_passwords_and_disabled_ping() {
        // テスト項目: passwords と ping_interval_secs = 0 を読み込める
        // given (前提条件):
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"ping_interval_secs":0,"passwords":{{"alice":"secret"}}}}"#
        )
        .unwrap();

        // when (操作):
        let config = ServerConfig::load(file.path()).unwrap();

        // then (期待する結果):
        assert_eq!(config.ping_interval_secs, 0);
        assert_eq!(config.passwords.get("alice").map(String::as_str), Some("secret"));
        assert!(ServerConfig::default().passwords.is_empty());
    }

    #[test]
    fn test_load_errors() {
        // テスト項目: ファイルがなければ Io、JSON でなければ Parse
        // given (前提条件):
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("broken.json");
        fs::write(&broken, "not json").unwrap();

        // when (操作):
        let missing = ServerConfig::load(&dir.path().join("missing.json"));
        let parse = ServerConfig::load(&broken);

        // then (期待する結果):
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
        assert!(matches!(parse, Err(ConfigError::Parse { .. })));
    }
}
