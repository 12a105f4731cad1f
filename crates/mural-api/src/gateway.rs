use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::{IntoResponse, Response},
};

use mural_engine::keys;
use mural_gateway::connection;
use mural_types::api::RoomQuery;

use crate::AppState;
use crate::error::ApiError;

/// `GET /gateway?room=` upgrades to the room's event socket. A room name the
/// engine would refuse is rejected before the upgrade.
pub async fn upgrade(
    State(state): State<AppState>,
    Query(query): Query<RoomQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    keys::room_key(&query.room, state.engine.config().room_policy)?;
    Ok(ws
        .on_upgrade(move |socket| connection::handle_connection(socket, state.engine, query.room))
        .into_response())
}
