//! WebSocket relay endpoint.

use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{
    sink::SinkExt,
    stream::{SplitSink, StreamExt},
};
use tokio::{
    sync::mpsc,
    time::{Instant, Interval},
};

use crate::{
    domain::{AuthError, ClientConnection, Outbound, ProtocolError},
    infrastructure::dto::websocket::Envelope,
    ui::state::RelayState,
};

/// How long the writer may keep flushing after the reader has stopped.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<RelayState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    // room lookups may hit the store
    let authenticator = Arc::clone(&state.authenticator);
    let authenticated = tokio::task::spawn_blocking(move || authenticator(&params)).await;
    let id = match authenticated {
        Ok(Ok(id)) => id,
        Err(e) => {
            tracing::error!("Authentication task failed: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        Ok(Err(e)) => {
            let status = match e {
                AuthError::MissingField(_) => StatusCode::BAD_REQUEST,
                AuthError::AuthenticationFailed(_) => StatusCode::FORBIDDEN,
            };
            tracing::warn!("Rejected connection ({}): {}", status, e);
            return (status, e.to_string()).into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, id))
}

/// Resolves at the next ping tick, or never when pings are disabled.
async fn next_ping(ping: &mut Option<Interval>) {
    match ping {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Single writer for the socket: application messages from `rx` and the
/// liveness ping both go through here. A zero `ping_interval` disables pings.
///
/// Ends on `Outbound::Close`, when every sender is gone, or on the first
/// failed write.
fn pusher_loop(
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    mut sink: SplitSink<WebSocket, Message>,
    ping_interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ping = (!ping_interval.is_zero())
            .then(|| tokio::time::interval_at(Instant::now() + ping_interval, ping_interval));
        loop {
            tokio::select! {
                outbound = rx.recv() => match outbound {
                    Some(Outbound::Text(text)) => {
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            tracing::debug!("Write failed: {}", e);
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                },
                _ = next_ping(&mut ping) => {
                    if let Err(e) = sink.send(Message::Ping(Bytes::new())).await {
                        tracing::debug!("Ping failed: {}", e);
                        break;
                    }
                }
            }
        }
    })
}

async fn dispatch(state: &RelayState, connection: &ClientConnection, text: &str) -> Result<(), ProtocolError> {
    let envelope = Envelope::parse(text)?;
    let handler = state
        .handlers
        .get(&envelope.message_type)
        .ok_or_else(|| ProtocolError::UnknownType(envelope.message_type.clone()))?;
    tracing::debug!("'{}' sent '{}'", connection.id(), envelope.message_type);
    handler
        .handle(connection, &envelope.message_type, envelope.data)
        .await;
    Ok(())
}

async fn handle_socket(socket: WebSocket, state: Arc<RelayState>, id: String) {
    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel();
    let connection = ClientConnection::new(id, tx);
    let mut send_task = pusher_loop(rx, sink, state.ping_interval);

    if !run_opened_hooks(&state, &connection).await {
        // lost a race against another connection with the same identity
        tracing::warn!("Connection '{}' refused after upgrade", connection.id());
        let _ = connection.close();
        let _ = tokio::time::timeout(CLOSE_GRACE, send_task).await;
        return;
    }
    tracing::info!("Connection '{}' opened", connection.id());

    let recv_state = Arc::clone(&state);
    let recv_connection = connection.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            let msg = match msg {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::debug!("WebSocket error on '{}': {}", recv_connection.id(), e);
                    break;
                }
            };
            match msg {
                Message::Text(text) => {
                    if let Err(e) = dispatch(&recv_state, &recv_connection, text.as_str()).await {
                        tracing::warn!("Closing '{}': {}", recv_connection.id(), e);
                        break;
                    }
                }
                Message::Binary(_) => {
                    tracing::warn!("Closing '{}': binary frames are not supported", recv_connection.id());
                    break;
                }
                Message::Close(_) => {
                    tracing::debug!("'{}' requested close", recv_connection.id());
                    break;
                }
                // pong replies are handled by the protocol layer
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut recv_task => {
            let _ = connection.close();
            if tokio::time::timeout(CLOSE_GRACE, &mut send_task).await.is_err() {
                send_task.abort();
            }
        }
        _ = &mut send_task => recv_task.abort(),
    }

    run_closed_hooks(&state, &connection).await;
    tracing::info!("Connection '{}' closed", connection.id());
}

/// Hooks take registry locks and may read the room store, so they run on the
/// blocking pool.
async fn run_opened_hooks(state: &Arc<RelayState>, connection: &ClientConnection) -> bool {
    let state = Arc::clone(state);
    let connection = connection.clone();
    let id = connection.id().to_string();
    tokio::task::spawn_blocking(move || state.on_opened.iter().all(|hook| hook(&connection)))
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Opened hooks for '{}' failed: {}", id, e);
            false
        })
}

async fn run_closed_hooks(state: &Arc<RelayState>, connection: &ClientConnection) {
    let state = Arc::clone(state);
    let connection = connection.clone();
    let id = connection.id().to_string();
    let result = tokio::task::spawn_blocking(move || {
        for hook in &state.on_closed {
            hook(&connection);
        }
    })
    .await;
    if let Err(e) = result {
        tracing::error!("Closed hooks for '{}' failed: {}", id, e);
    }
}
