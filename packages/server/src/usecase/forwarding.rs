//! UseCase: シグナリングメッセージの転送
//!
//! - `RoomForwarding`: 同じルーム内のピアへ転送する。`data.to` で宛先を指定し、
//!   転送先では `data.from` が送信者のユーザー ID で上書きされる。
//! - `DirectForwarding`: ルームを使わず、ユーザー ID で直接転送する。
//!
//! ペイロードの中身は解釈しない。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::RoomControllers;
use crate::{
    domain::{ClientConnection, ConnectionId, MessageHandler},
    infrastructure::{
        dto::websocket::{ERROR_MESSAGE_TYPE, peer_not_found},
        registry::ConnectionRegistry,
    },
};

fn target_of(message_type: &str, sender: &ClientConnection, data: &Map<String, Value>) -> Option<String> {
    match data.get("to").and_then(Value::as_str) {
        Some(to) => Some(to.to_string()),
        None => {
            tracing::warn!(
                "Dropping '{}' from '{}': missing data.to",
                message_type,
                sender.id()
            );
            None
        }
    }
}

fn deliver(
    sender: &ClientConnection,
    from: String,
    peer: &ClientConnection,
    message_type: &str,
    mut data: Map<String, Value>,
) {
    data.insert("from".to_string(), Value::String(from));
    match peer.send_typed(message_type, &data) {
        Ok(()) => tracing::debug!("Forwarded '{}' from '{}' to '{}'", message_type, sender.id(), peer.id()),
        Err(e) => tracing::warn!("Failed to forward '{}' to '{}': {}", message_type, peer.id(), e),
    }
}

fn reply_not_found(sender: &ClientConnection, message_type: &str, reason: String) {
    tracing::debug!("{}", reason);
    if let Err(e) = sender.send_typed(ERROR_MESSAGE_TYPE, &peer_not_found(message_type, reason)) {
        tracing::warn!("Failed to send error reply to '{}': {}", sender.id(), e);
    }
}

/// ルーム内転送
pub struct RoomForwarding {
    controllers: Arc<RoomControllers>,
}

impl RoomForwarding {
    pub fn new(controllers: Arc<RoomControllers>) -> Self {
        Self { controllers }
    }

    pub fn forward(&self, sender: &ClientConnection, message_type: &str, data: Map<String, Value>) {
        let Some(to) = target_of(message_type, sender, &data) else {
            return;
        };
        let id = match ConnectionId::parse(sender.id()) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!("Dropping '{}': {}", message_type, e);
                return;
            }
        };

        match self.controllers.get_room(&id.room) {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::info!("Room '{}' is gone, closing '{}'", id.room, sender.id());
                if let Err(e) = sender.close() {
                    tracing::warn!("Failed to close '{}': {}", sender.id(), e);
                }
                return;
            }
            Err(e) => {
                tracing::error!("Failed to load room '{}': {}", id.room, e);
                return;
            }
        }

        match self.controllers.get_connection_in_room(&id.room, &to) {
            Some(peer) => deliver(sender, id.user, &peer, message_type, data),
            None => reply_not_found(
                sender,
                message_type,
                format!("Peer {} not found in room {}", to, id.room),
            ),
        }
    }
}

#[async_trait]
impl MessageHandler for RoomForwarding {
    async fn handle(&self, sender: &ClientConnection, message_type: &str, data: Map<String, Value>) {
        self.forward(sender, message_type, data);
    }
}

/// ルームなしの直接転送（接続 ID = ユーザー ID）
pub struct DirectForwarding {
    connections: Arc<ConnectionRegistry>,
}

impl DirectForwarding {
    pub fn new(connections: Arc<ConnectionRegistry>) -> Self {
        Self { connections }
    }

    pub fn forward(&self, sender: &ClientConnection, message_type: &str, data: Map<String, Value>) {
        let Some(to) = target_of(message_type, sender, &data) else {
            return;
        };
        match self.connections.get(&to) {
            Some(peer) => deliver(sender, sender.id().to_string(), &peer, message_type, data),
            None => reply_not_found(sender, message_type, format!("Peer {} not found", to)),
        }
    }
}

#[async_trait]
impl MessageHandler for DirectForwarding {
    async fn handle(&self, sender: &ClientConnection, message_type: &str, data: Map<String, Value>) {
        self.forward(sender, message_type, data);
    }
}
