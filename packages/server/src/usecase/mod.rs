//! UseCase 層
//!
//! ルームコントローラ（常設 / 期限付き / 定期）、その束、接続受付時の認証、
//! シグナリングメッセージの転送。

pub mod authenticator;
pub mod controllers;
pub mod error;
pub mod forwarding;
pub mod permanent;
pub mod recurring;
pub mod room_controller;
pub mod time_window;

pub use authenticator::Authenticator;
pub use controllers::RoomControllers;
pub use error::ControllerError;
pub use forwarding::{DirectForwarding, RoomForwarding};
pub use permanent::PermanentRoomController;
pub use recurring::RecurringRoomController;
pub use room_controller::RoomController;
pub use time_window::TimeWindowRoomController;
