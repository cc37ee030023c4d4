//! UI 層: WebSocket リレー、ルーム管理 API、サーバー起動

pub mod app;
pub mod handler;
pub mod relay;
mod server;
mod signal;
pub mod state;

pub use app::{AppError, RoomApp, build_direct_app, build_room_app};
pub use relay::{RelayServer, RelayServerBuilder, SetupError};
pub use server::Server;
pub use signal::shutdown_signal;
