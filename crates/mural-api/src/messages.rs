use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use mural_types::api::{PostMessageRequest, RoomQuery};

use crate::error::ApiError;
use crate::{AppState, blocking};

/// Retained history of the room, in the configured order.
pub async fn get_messages(
    State(state): State<AppState>,
    Query(query): Query<RoomQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = blocking(&state, move |engine| engine.messages(&query.room)).await?;
    Ok(Json(messages))
}

pub async fn post_message(
    State(state): State<AppState>,
    Query(query): Query<RoomQuery>,
    Json(req): Json<PostMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = blocking(&state, move |engine| engine.post_message(&query.room, req)).await?;
    Ok((StatusCode::CREATED, Json(message)))
}
