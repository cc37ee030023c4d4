pub mod http;
pub mod websocket;

pub use http::admin_router;
pub use websocket::websocket_handler;
