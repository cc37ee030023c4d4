//! Generic typed-message relay over WebSocket.
//!
//! A `RelayServer` owns the admission authenticator, one handler per envelope
//! type and the connection lifecycle hooks. The room-scoped signaling protocol
//! and the room-less direct mode are both assembled on top of it.

use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{Router, routing::get};
use thiserror::Error;

use super::{
    handler::websocket_handler,
    state::{BoxError, ClosedHook, OpenedHook, RelayState, ShutdownHook},
};
use crate::{
    domain::{ClientConnection, ConnectionId, MessageHandler},
    infrastructure::registry::ConnectionRegistry,
    usecase::{
        Authenticator, DirectForwarding, RoomControllers, RoomForwarding,
        authenticator::room_user_permit_allowed,
    },
};

/// Default liveness ping interval.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(66);

/// Negotiation messages relayed by default.
pub const DEFAULT_MESSAGE_TYPES: [&str; 3] = ["offer", "answer", "candidate"];

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("a handler for message type '{0}' is already registered")]
    DuplicateHandler(String),
}

pub struct RelayServerBuilder {
    authenticator: Authenticator,
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
    on_opened: Vec<OpenedHook>,
    on_closed: Vec<ClosedHook>,
    on_shutdown: Vec<ShutdownHook>,
    ping_interval: Duration,
}

impl RelayServerBuilder {
    /// Route envelopes of `message_type` to `handler`.
    pub fn handle(
        mut self,
        message_type: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self, SetupError> {
        let message_type = message_type.into();
        if self.handlers.contains_key(&message_type) {
            return Err(SetupError::DuplicateHandler(message_type));
        }
        self.handlers.insert(message_type, handler);
        Ok(self)
    }

    pub fn handle_all<I, S>(
        mut self,
        message_types: I,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self, SetupError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for message_type in message_types {
            self = self.handle(message_type, Arc::clone(&handler))?;
        }
        Ok(self)
    }

    pub fn on_connection_opened(
        mut self,
        hook: impl Fn(&ClientConnection) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.on_opened.push(Arc::new(hook));
        self
    }

    pub fn on_connection_closed(
        mut self,
        hook: impl Fn(&ClientConnection) + Send + Sync + 'static,
    ) -> Self {
        self.on_closed.push(Arc::new(hook));
        self
    }

    pub fn on_shutdown(
        mut self,
        hook: impl Fn() -> Result<(), BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.on_shutdown.push(Arc::new(hook));
        self
    }

    /// Interval between liveness pings; `Duration::ZERO` disables them.
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn build(self) -> RelayServer {
        RelayServer {
            state: Arc::new(RelayState {
                authenticator: self.authenticator,
                handlers: self.handlers,
                on_opened: self.on_opened,
                on_closed: self.on_closed,
                ping_interval: self.ping_interval,
            }),
            on_shutdown: Arc::new(self.on_shutdown),
        }
    }
}

#[derive(Clone)]
pub struct RelayServer {
    state: Arc<RelayState>,
    on_shutdown: Arc<Vec<ShutdownHook>>,
}

impl RelayServer {
    pub fn builder(authenticator: Authenticator) -> RelayServerBuilder {
        RelayServerBuilder {
            authenticator,
            handlers: HashMap::new(),
            on_opened: Vec::new(),
            on_closed: Vec::new(),
            on_shutdown: Vec::new(),
            ping_interval: DEFAULT_PING_INTERVAL,
        }
    }

    /// Room-scoped signaling: admission through the controllers, forwarding
    /// of `message_types` between peers of the same room.
    pub fn for_rooms<I, S>(
        controllers: Arc<RoomControllers>,
        message_types: I,
        ping_interval: Duration,
    ) -> Result<Self, SetupError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let opened = Arc::clone(&controllers);
        let closed = Arc::clone(&controllers);
        let shutdown = Arc::clone(&controllers);
        Ok(Self::builder(room_user_permit_allowed(Arc::clone(&controllers)))
            .handle_all(message_types, Arc::new(RoomForwarding::new(controllers)))?
            .on_connection_opened(move |conn| match ConnectionId::parse(conn.id()) {
                Ok(id) => opened.new_connection_for_room(&id.room, conn),
                Err(e) => {
                    tracing::warn!("Refusing connection '{}': {}", conn.id(), e);
                    false
                }
            })
            .on_connection_closed(move |conn| {
                if let Ok(id) = ConnectionId::parse(conn.id()) {
                    closed.connection_closed(&id.room, &id.user);
                }
            })
            .on_shutdown(move || shutdown.close().map_err(Into::into))
            .ping_interval(ping_interval)
            .build())
    }

    /// Room-less signaling: a peer admitted by `authenticator` may address
    /// any other connected user. The authenticator's id is the user id.
    pub fn direct<I, S>(
        authenticator: Authenticator,
        message_types: I,
        ping_interval: Duration,
    ) -> Result<Self, SetupError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let connections = Arc::new(ConnectionRegistry::new());
        let opened = Arc::clone(&connections);
        let closed = Arc::clone(&connections);
        let shutdown = Arc::clone(&connections);
        Ok(Self::builder(authenticator)
            .handle_all(message_types, Arc::new(DirectForwarding::new(connections)))?
            .on_connection_opened(move |conn| opened.add_if_absent(conn.clone()))
            .on_connection_closed(move |conn| {
                closed.remove(conn.id());
            })
            .on_shutdown(move || {
                let (count, last_error) = shutdown.close_all();
                tracing::info!("Closed {} direct connection(s)", count);
                match last_error {
                    Some(e) => Err(e.into()),
                    None => Ok(()),
                }
            })
            .ping_interval(ping_interval)
            .build())
    }

    /// Router serving the relay endpoint at `path`.
    pub fn router(&self, path: &str) -> Router {
        Router::new()
            .route(path, get(websocket_handler))
            .with_state(Arc::clone(&self.state))
    }

    /// Run every shutdown hook, returning the last error.
    pub fn close(&self) -> Result<(), BoxError> {
        let mut result = Ok(());
        for hook in self.on_shutdown.iter() {
            if let Err(e) = hook() {
                tracing::error!("Shutdown hook failed: {}", e);
                result = Err(e);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usecase::authenticator::user_permit_all;

    #[test]
    fn test_duplicate_handler_is_a_setup_error() {
        // テスト項目: 同じ type のハンドラを 2 回登録するとエラーになる
        // given (前提条件):
        let handler: Arc<dyn MessageHandler> =
            Arc::new(DirectForwarding::new(Arc::new(ConnectionRegistry::new())));

        // when (操作):
        let result = RelayServer::builder(user_permit_all())
            .handle_all(["offer", "answer", "offer"], handler);

        // then (期待する結果):
        assert!(matches!(result, Err(SetupError::DuplicateHandler(t)) if t == "offer"));
    }

    #[test]
    fn test_close_runs_every_hook_and_keeps_last_error() {
        // テスト項目: close は全てのシャットダウンフックを実行し、最後のエラーを返す
        // given (前提条件):
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let (first, second, third) = (calls.clone(), calls.clone(), calls.clone());
        let relay = RelayServer::builder(user_permit_all())
            .on_shutdown(move || {
                first.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Err("first".into())
            })
            .on_shutdown(move || {
                second.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Err("second".into())
            })
            .on_shutdown(move || {
                third.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            })
            .build();

        // when (操作):
        let result = relay.close();

        // then (期待する結果):
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
        assert_eq!(result.unwrap_err().to_string(), "second");
    }
}
