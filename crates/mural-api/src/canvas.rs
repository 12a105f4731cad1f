use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use mural_engine::Placement;
use mural_types::api::{PixelQuery, PlacePixelRequest, PlacePixelsRequest, RoomQuery};

use crate::error::ApiError;
use crate::{AppState, blocking};

pub async fn get_canvas(
    State(state): State<AppState>,
    Query(query): Query<RoomQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let canvas = blocking(&state, move |engine| engine.canvas(&query.room)).await?;
    Ok(Json(canvas))
}

pub async fn get_pixel(
    State(state): State<AppState>,
    Query(query): Query<PixelQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let record = blocking(&state, move |engine| engine.pixel(&query.room, query.x, query.y)).await?;
    Ok(Json(record))
}

/// Single pixel. Answers with the stored record, or `{"duplicate": true}`
/// when the batch token was already applied.
pub async fn place_pixel(
    State(state): State<AppState>,
    Query(query): Query<RoomQuery>,
    Json(req): Json<PlacePixelRequest>,
) -> Result<Response, ApiError> {
    let placement = blocking(&state, move |engine| engine.place_pixel(&query.room, req)).await?;
    Ok(match placement {
        Placement::Applied(mut records) => match records.pop() {
            Some(record) => (StatusCode::CREATED, Json(record)).into_response(),
            None => StatusCode::NO_CONTENT.into_response(),
        },
        Placement::Duplicate => duplicate(),
    })
}

pub async fn place_batch(
    State(state): State<AppState>,
    Query(query): Query<RoomQuery>,
    Json(req): Json<PlacePixelsRequest>,
) -> Result<Response, ApiError> {
    let placement = blocking(&state, move |engine| engine.place_pixels(&query.room, req)).await?;
    Ok(match placement {
        Placement::Applied(records) => (StatusCode::CREATED, Json(records)).into_response(),
        Placement::Duplicate => duplicate(),
    })
}

pub async fn reset(
    State(state): State<AppState>,
    Query(query): Query<RoomQuery>,
) -> Result<&'static str, ApiError> {
    blocking(&state, move |engine| engine.reset_room(&query.room)).await?;
    Ok("Canvas reset")
}

fn duplicate() -> Response {
    (StatusCode::OK, Json(json!({ "duplicate": true }))).into_response()
}
