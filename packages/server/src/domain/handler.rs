//! Typed message handler seam between the relay transport and the protocol on top of it.

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::ClientConnection;

/// Handles one envelope type received from a connection.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, sender: &ClientConnection, message_type: &str, data: Map<String, Value>);
}
