//! UseCase: 接続受付時の認証
//!
//! 認証器は WebSocket アップグレード前のクエリパラメータを受け取り、
//! 接続 ID を返す。返した ID がそのまま接続レジストリのキーになる。

use std::{collections::HashMap, sync::Arc};

use super::RoomControllers;
use crate::domain::{AuthError, ConnectionId};

pub type Authenticator =
    Arc<dyn Fn(&HashMap<String, String>) -> Result<String, AuthError> + Send + Sync>;

fn required<'a>(
    params: &'a HashMap<String, String>,
    field: &'static str,
) -> Result<&'a str, AuthError> {
    match params.get(field) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(AuthError::MissingField(field)),
    }
}

/// `user` だけを要求し、ユーザー ID をそのまま接続 ID にする（ルームなしの直接転送用）
pub fn user_permit_all() -> Authenticator {
    Arc::new(
        |params: &HashMap<String, String>| -> Result<String, AuthError> {
            Ok(required(params, "user")?.to_string())
        },
    )
}

/// `user` と `password` を要求し、`check` が true を返したときだけ受け付ける
pub fn user_password<F>(check: F) -> Authenticator
where
    F: Fn(&str, &str) -> bool + Send + Sync + 'static,
{
    Arc::new(move |params: &HashMap<String, String>| -> Result<String, AuthError> {
        let user = required(params, "user")?;
        let password = required(params, "password")?;
        if !check(user, password) {
            return Err(AuthError::AuthenticationFailed(format!(
                "invalid password for user '{}'",
                user
            )));
        }
        Ok(user.to_string())
    })
}

/// `room` と `user` を要求し、ルームが存在し、そのユーザーが今許可されていて、
/// まだ接続していないときに `{"r":..,"u":..}` を返す
pub fn room_user_permit_allowed(controllers: Arc<RoomControllers>) -> Authenticator {
    Arc::new(move |params: &HashMap<String, String>| -> Result<String, AuthError> {
        let room_id = required(params, "room")?;
        let user = required(params, "user")?;

        let room = match controllers.get_room(room_id) {
            Ok(Some(room)) => room,
            Ok(None) => {
                return Err(AuthError::AuthenticationFailed(format!(
                    "room '{}' not found",
                    room_id
                )));
            }
            Err(e) => {
                tracing::error!("Failed to load room '{}': {}", room_id, e);
                return Err(AuthError::AuthenticationFailed(format!(
                    "room '{}' is unavailable",
                    room_id
                )));
            }
        };
        if !room.is_allowed(user) {
            return Err(AuthError::AuthenticationFailed(format!(
                "user '{}' is not allowed in room '{}'",
                user, room_id
            )));
        }
        if controllers.is_connected(room_id, user) {
            return Err(AuthError::AuthenticationFailed(format!(
                "user '{}' is already connected to room '{}'",
                user, room_id
            )));
        }
        Ok(ConnectionId::new(room_id, user).key())
    })
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        domain::{ClientConnection, Room},
        infrastructure::repository::MemoryRoomStore,
        usecase::{PermanentRoomController, RoomController},
    };

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn controllers() -> (Arc<RoomControllers>, Arc<dyn RoomController>) {
        let permanent: Arc<dyn RoomController> =
            Arc::new(PermanentRoomController::new(Arc::new(MemoryRoomStore::with_rooms(vec![
                Room::permanent("lobby", vec!["alice".to_string(), "bob".to_string()]),
            ]))));
        (
            Arc::new(RoomControllers::new(vec![permanent.clone()])),
            permanent,
        )
    }

    #[test]
    fn test_room_authenticator_returns_connection_id() {
        // テスト項目: 許可されたユーザーには {"r":..,"u":..} 形式の接続 ID が返る
        // given (前提条件):
        let (controllers, _) = controllers();
        let authenticate = room_user_permit_allowed(controllers);

        // when (操作):
        let result = authenticate(&params(&[("room", "lobby"), ("user", "alice")]));

        // then (期待する結果):
        assert_eq!(result, Ok(r#"{"r":"lobby","u":"alice"}"#.to_string()));
    }

    #[test]
    fn test_room_authenticator_rejections() {
        // テスト項目: 項目不足は MissingField、未知のルーム・未許可ユーザー・接続済みは AuthenticationFailed
        // given (前提条件):
        let (controllers, permanent) = controllers();
        let authenticate = room_user_permit_allowed(controllers);
        let (tx, _rx) = mpsc::unbounded_channel();
        permanent.new_connection_for_room(
            "lobby",
            ClientConnection::new(ConnectionId::new("lobby", "bob").key(), tx),
        );

        // when (操作):
        let missing_user = authenticate(&params(&[("room", "lobby")]));
        let missing_room = authenticate(&params(&[("user", "alice")]));
        let unknown_room = authenticate(&params(&[("room", "nope"), ("user", "alice")]));
        let not_allowed = authenticate(&params(&[("room", "lobby"), ("user", "mallory")]));
        let duplicate = authenticate(&params(&[("room", "lobby"), ("user", "bob")]));

        // then (期待する結果):
        assert_eq!(missing_user, Err(AuthError::MissingField("user")));
        assert_eq!(missing_room, Err(AuthError::MissingField("room")));
        assert!(matches!(unknown_room, Err(AuthError::AuthenticationFailed(_))));
        assert!(matches!(not_allowed, Err(AuthError::AuthenticationFailed(_))));
        assert!(matches!(duplicate, Err(AuthError::AuthenticationFailed(_))));
    }

    #[test]
    fn test_user_password_authenticator() {
        // テスト項目: パスワードが正しいときだけ受け付ける
        // given (前提条件):
        let authenticate = user_password(|user, password| user == "alice" && password == "secret");

        // when (操作):
        let ok = authenticate(&params(&[("user", "alice"), ("password", "secret")]));
        let wrong = authenticate(&params(&[("user", "alice"), ("password", "guess")]));
        let missing = authenticate(&params(&[("user", "alice")]));

        // then (期待する結果):
        assert_eq!(ok, Ok("alice".to_string()));
        assert!(matches!(wrong, Err(AuthError::AuthenticationFailed(_))));
        assert_eq!(missing, Err(AuthError::MissingField("password")));
    }

    #[test]
    fn test_user_permit_all_requires_user() {
        // テスト項目: user があれば誰でも受け付け、空文字は項目不足として扱う
        // given (前提条件):
        let authenticate = user_permit_all();

        // when (操作):
        let ok = authenticate(&params(&[("user", "carol")]));
        let empty = authenticate(&params(&[("user", "")]));

        // then (期待する結果):
        assert_eq!(ok, Ok("carol".to_string()));
        assert_eq!(empty, Err(AuthError::MissingField("user")));
    }
}
