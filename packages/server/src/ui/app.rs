//! Wiring of the signaling application from a `ServerConfig`.

use std::{sync::Arc, time::Duration};

use axum::{Router, routing::get};
use thiserror::Error;

use super::{
    handler::{admin_router, http::health_check},
    relay::{RelayServer, SetupError},
    state::RoomVariant,
};
use crate::{
    config::{RouteGroupConfig, ServerConfig},
    domain::{Room, RoomKind, RoomStore, StoreError, TemporaryRoomStore},
    infrastructure::repository::{MemoryRoomStore, RedbRoomStore},
    usecase::{
        ControllerError, PermanentRoomController, RecurringRoomController, RoomController,
        RoomControllers, TimeWindowRoomController,
        authenticator::{user_password, user_permit_all},
    },
};

pub const PERMANENT_PREFIX: &str = "/rooms/permanent";
pub const TIME_WINDOW_PREFIX: &str = "/rooms/temp";
pub const RECURRING_PREFIX: &str = "/rooms/repeat";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to open room store: {0}")]
    Store(#[from] StoreError),
    #[error("failed to load permanent room: {0}")]
    Controller(#[from] ControllerError),
    #[error(transparent)]
    Setup(#[from] SetupError),
}

/// Room-scoped signaling application.
pub struct RoomApp {
    pub relay: RelayServer,
    /// Admin route groups for every room variant plus `/health`.
    pub admin: Router,
    pub controllers: Arc<RoomControllers>,
}

fn open_store(group: &RouteGroupConfig, variant: &str) -> Result<Arc<dyn TemporaryRoomStore>, StoreError> {
    match &group.db_path {
        Some(path) => {
            tracing::info!("Using {} for {} rooms", path.display(), variant);
            Ok(Arc::new(RedbRoomStore::open(path)?))
        }
        None => {
            tracing::info!("Keeping {} rooms in memory", variant);
            Ok(Arc::new(MemoryRoomStore::new()))
        }
    }
}

/// # Panics
///
/// Must be called within a Tokio runtime: the expiring controllers arm their
/// timers on the current runtime.
pub fn build_room_app(config: &ServerConfig) -> Result<RoomApp, AppError> {
    let permanent_store: Arc<dyn RoomStore> = open_store(&config.admin.permanent, "permanent")?;
    let time_window_store = open_store(&config.admin.time_window, "time-window")?;
    let recurring_store: Arc<dyn RoomStore> = open_store(&config.admin.recurring, "recurring")?;

    let permanent = Arc::new(PermanentRoomController::new(permanent_store));
    for room in &config.permanent_rooms {
        let room = Room::new(&room.id, room.allowed_clients.iter().cloned(), RoomKind::Permanent)
            .map_err(ControllerError::from)?;
        tracing::info!("Loaded permanent room '{}'", room.id());
        permanent.add_room(room, true)?;
    }
    let time_window = TimeWindowRoomController::new(time_window_store);
    let recurring = RecurringRoomController::new(recurring_store);

    let admin = Router::new()
        .route("/health", get(health_check))
        .merge(admin_router(
            config.admin.permanent.prefix.as_deref().unwrap_or(PERMANENT_PREFIX),
            permanent.clone(),
            RoomVariant::Permanent,
        ))
        .merge(admin_router(
            config.admin.time_window.prefix.as_deref().unwrap_or(TIME_WINDOW_PREFIX),
            time_window.clone(),
            RoomVariant::TimeWindow,
        ))
        .merge(admin_router(
            config.admin.recurring.prefix.as_deref().unwrap_or(RECURRING_PREFIX),
            recurring.clone(),
            RoomVariant::Recurring,
        ));

    let controllers = Arc::new(RoomControllers::new(vec![
        permanent as Arc<dyn RoomController>,
        time_window,
        recurring,
    ]));
    let relay = RelayServer::for_rooms(
        Arc::clone(&controllers),
        config.message_types.iter().cloned(),
        Duration::from_secs(config.ping_interval_secs),
    )?;

    Ok(RoomApp {
        relay,
        admin,
        controllers,
    })
}

/// Room-less signaling: peers address each other by user id. With
/// `config.passwords` set, only listed users with the right password connect.
pub fn build_direct_app(config: &ServerConfig) -> Result<RelayServer, AppError> {
    let authenticator = if config.passwords.is_empty() {
        user_permit_all()
    } else {
        tracing::info!("Direct mode requires passwords for {} user(s)", config.passwords.len());
        let passwords = config.passwords.clone();
        user_password(move |user, password| {
            passwords.get(user).is_some_and(|expected| expected == password)
        })
    };
    Ok(RelayServer::direct(
        authenticator,
        config.message_types.iter().cloned(),
        Duration::from_secs(config.ping_interval_secs),
    )?)
}
