//! Room administration endpoints.
//!
//! Each room variant gets its own route group (`<prefix>/add`, `/edit`,
//! `/remove`) bound to the controller that owns that variant. Parameters are
//! read from the query string for both GET and POST.

use std::{collections::HashMap, sync::Arc};

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    routing::get,
};
use roomrelay_shared::time::{unix_now, unix_to_rfc3339};

use crate::{
    domain::{Room, RoomKind, StoreError},
    ui::state::{AdminState, RoomVariant},
    usecase::{ControllerError, RoomController},
};

type Params = HashMap<String, String>;
type AdminResponse = (StatusCode, String);

pub fn admin_router(
    prefix: &str,
    controller: Arc<dyn RoomController>,
    variant: RoomVariant,
) -> Router {
    let prefix = prefix.trim_end_matches('/');
    Router::new()
        .route(&format!("{}/add", prefix), get(add_room).post(add_room))
        .route(&format!("{}/edit", prefix), get(edit_room).post(edit_room))
        .route(
            &format!("{}/remove", prefix),
            get(remove_room).post(remove_room),
        )
        .with_state(Arc::new(AdminState {
            controller,
            variant,
        }))
}

/// Health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

fn bad_request(reason: impl Into<String>) -> AdminResponse {
    (StatusCode::BAD_REQUEST, reason.into())
}

fn required<'a>(params: &'a Params, name: &str) -> Result<&'a str, AdminResponse> {
    match params.get(name) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(bad_request(format!("missing parameter '{}'", name))),
    }
}

fn integer(params: &Params, name: &str) -> Result<i64, AdminResponse> {
    let value = required(params, name)?;
    value
        .trim()
        .parse()
        .map_err(|_| bad_request(format!("parameter '{}' is not an integer: {}", name, value)))
}

fn allowed_clients(params: &Params) -> Result<Vec<String>, AdminResponse> {
    let raw = required(params, "allowed_clients")?;
    serde_json::from_str(raw).map_err(|e| {
        bad_request(format!(
            "parameter 'allowed_clients' must be a JSON array of strings: {}",
            e
        ))
    })
}

/// Build the room described by `params`, with relative times resolved
/// against `now`.
fn room_from_params(variant: RoomVariant, params: &Params, now: i64) -> Result<Room, AdminResponse> {
    let id = required(params, "id")?;
    let allowed = allowed_clients(params)?;
    let kind = match variant {
        RoomVariant::Permanent => RoomKind::Permanent,
        RoomVariant::TimeWindow => RoomKind::TimeWindow {
            valid_from: now.saturating_add(integer(params, "valid_from_in_seconds_from_now")?),
            valid_until: now.saturating_add(integer(params, "valid_until_in_seconds_from_now")?),
        },
        RoomVariant::Recurring => RoomKind::Recurring {
            first_occurrence: now
                .saturating_add(integer(params, "first_time_unix_in_seconds_from_now")?),
            period: integer(params, "repeat_every_seconds")?,
            duration: integer(params, "duration_in_seconds")?,
        },
    };
    Room::new(id, allowed, kind).map_err(|e| bad_request(e.to_string()))
}

fn describe(room: &Room) -> String {
    let peers = room
        .allowed_peers()
        .iter()
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");
    match room.kind() {
        RoomKind::Permanent => format!("room {} for [{}]", room.id(), peers),
        RoomKind::TimeWindow {
            valid_from,
            valid_until,
        } => format!(
            "room {} for [{}] valid from {} until {}",
            room.id(),
            peers,
            unix_to_rfc3339(valid_from),
            unix_to_rfc3339(valid_until)
        ),
        RoomKind::Recurring {
            first_occurrence,
            period,
            duration,
        } => format!(
            "room {} for [{}] open from {} for {}s every {}s",
            room.id(),
            peers,
            unix_to_rfc3339(first_occurrence),
            duration,
            period
        ),
    }
}

fn controller_error(e: ControllerError) -> AdminResponse {
    match e {
        ControllerError::Store(StoreError::AlreadyExists(id)) => {
            (StatusCode::FORBIDDEN, format!("room {} already exists", id))
        }
        ControllerError::InvalidRoom(_) | ControllerError::UnsupportedRoomKind { .. } => {
            bad_request(e.to_string())
        }
        e => {
            tracing::error!("Room administration failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

fn put_room(state: &AdminState, params: &Params, allow_override: bool) -> AdminResponse {
    let room = match room_from_params(state.variant, params, unix_now()) {
        Ok(room) => room,
        Err(rejection) => return rejection,
    };
    let description = describe(&room);
    match state.controller.add_room(room, allow_override) {
        Ok(()) => {
            let verb = if allow_override { "Saved" } else { "Added" };
            tracing::info!("{} {}", verb, description);
            (StatusCode::OK, format!("{} {}", verb, description))
        }
        Err(e) => controller_error(e),
    }
}

/// Controllers write through to the store and close connections while
/// holding their lock, so every admin operation runs on the blocking pool.
async fn run_blocking<F>(f: F) -> AdminResponse
where
    F: FnOnce() -> AdminResponse + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.unwrap_or_else(|e| {
        tracing::error!("Room administration task failed: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })
}

async fn add_room(State(state): State<Arc<AdminState>>, Query(params): Query<Params>) -> AdminResponse {
    run_blocking(move || put_room(&state, &params, false)).await
}

async fn edit_room(State(state): State<Arc<AdminState>>, Query(params): Query<Params>) -> AdminResponse {
    run_blocking(move || put_room(&state, &params, true)).await
}

async fn remove_room(
    State(state): State<Arc<AdminState>>,
    Query(params): Query<Params>,
) -> AdminResponse {
    run_blocking(move || delete_room(&state, &params)).await
}

fn delete_room(state: &AdminState, params: &Params) -> AdminResponse {
    let id = match required(params, "id") {
        Ok(id) => id,
        Err(rejection) => return rejection,
    };
    match state.controller.close_and_remove_room(id) {
        Ok(true) => {
            tracing::info!("Removed room {}", id);
            (StatusCode::OK, format!("Removed room {}", id))
        }
        Ok(false) => (StatusCode::NOT_FOUND, format!("room {} not found", id)),
        Err(e) => controller_error(e),
    }
}
