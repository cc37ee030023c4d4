//! Server execution logic.

use std::future::Future;

use axum::Router;
use tokio::{net::TcpListener, sync::watch};
use tower_http::trace::TraceLayer;

use super::{relay::RelayServer, signal::shutdown_signal, state::BoxError};

/// Signaling server: the relay endpoint plus an optional admin listener.
///
/// # Example
///
/// ```ignore
/// let app = build_room_app(&config)?;
/// let server = Server::new(app.relay, "/signal").with_admin(app.admin);
/// server.run("127.0.0.1", 8080, Some(("127.0.0.1", 8081))).await?;
/// ```
pub struct Server {
    relay: RelayServer,
    relay_route: String,
    admin: Option<Router>,
}

async fn stopped(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stopped| *stopped).await;
}

impl Server {
    pub fn new(relay: RelayServer, relay_route: impl Into<String>) -> Self {
        Self {
            relay,
            relay_route: relay_route.into(),
            admin: None,
        }
    }

    /// Serve `admin` on its own listener. Room administration has no
    /// authentication, so bind it to a local address.
    pub fn with_admin(mut self, admin: Router) -> Self {
        self.admin = Some(admin);
        self
    }

    /// Bind and serve until Ctrl+C or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if a listener cannot be bound, if serving fails, or
    /// if closing the relay reported an error.
    pub async fn run(
        self,
        host: &str,
        port: u16,
        admin_addr: Option<(&str, u16)>,
    ) -> Result<(), BoxError> {
        let listener = TcpListener::bind((host, port)).await?;
        let admin_listener = match (&self.admin, admin_addr) {
            (Some(_), Some(addr)) => Some(TcpListener::bind(addr).await?),
            (Some(_), None) => {
                tracing::warn!("No admin address configured; room administration is disabled");
                None
            }
            (None, _) => None,
        };
        tracing::info!("Press Ctrl+C to shutdown gracefully");
        self.serve(listener, admin_listener, shutdown_signal()).await
    }

    /// Serve on already bound listeners until `shutdown` resolves.
    ///
    /// On shutdown both listeners stop accepting first, then the relay's
    /// shutdown hooks close every connection and store.
    pub async fn serve(
        self,
        listener: TcpListener,
        admin_listener: Option<TcpListener>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), BoxError> {
        let (tx, rx) = watch::channel(false);

        tracing::info!(
            "Relay listening on ws://{}{}",
            listener.local_addr()?,
            self.relay_route
        );
        let relay_app = self
            .relay
            .router(&self.relay_route)
            .layer(TraceLayer::new_for_http());
        let relay_rx = rx.clone();
        let relay_server = async move {
            axum::serve(listener, relay_app)
                .with_graceful_shutdown(stopped(relay_rx))
                .await
        };

        let admin = match (self.admin, admin_listener) {
            (Some(router), Some(admin_listener)) => {
                tracing::info!("Room administration on http://{}", admin_listener.local_addr()?);
                Some((admin_listener, router.layer(TraceLayer::new_for_http())))
            }
            _ => None,
        };
        let admin_server = async move {
            match admin {
                Some((admin_listener, router)) => {
                    axum::serve(admin_listener, router)
                        .with_graceful_shutdown(stopped(rx))
                        .await
                }
                None => Ok(()),
            }
        };

        let relay = self.relay.clone();
        let closer = async move {
            shutdown.await;
            let _ = tx.send(true);
            tracing::info!("Closing relay connections");
            relay.close()
        };

        let (relay_result, admin_result, close_result) =
            tokio::join!(relay_server, admin_server, closer);
        relay_result?;
        admin_result?;
        close_result?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}
