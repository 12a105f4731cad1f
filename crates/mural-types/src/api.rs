use serde::{Deserialize, Serialize};

use crate::models::UserPresence;

pub const DEFAULT_ROOM: &str = "default";

fn default_room() -> String {
    DEFAULT_ROOM.to_string()
}

// -- Queries --

#[derive(Debug, Clone, Deserialize)]
pub struct RoomQuery {
    #[serde(default = "default_room")]
    pub room: String,
}

impl Default for RoomQuery {
    fn default() -> Self {
        Self { room: default_room() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PixelQuery {
    #[serde(default = "default_room")]
    pub room: String,
    pub x: i64,
    pub y: i64,
}

// -- Canvas --

/// Coordinates arrive signed so that negative values surface as a
/// validation failure rather than a decode failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelPlacement {
    pub x: i64,
    pub y: i64,
    pub color: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacePixelRequest {
    pub x: i64,
    pub y: i64,
    pub color: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// A batch of placements sharing one idempotency token (`batch_id` + `timestamp`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacePixelsRequest {
    #[serde(default)]
    pub batch_id: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    pub pixels: Vec<PixelPlacement>,
}

impl From<PlacePixelRequest> for PlacePixelsRequest {
    fn from(req: PlacePixelRequest) -> Self {
        Self {
            batch_id: req.batch_id.unwrap_or_default(),
            timestamp: req.timestamp.unwrap_or_default(),
            user_id: req.user_id,
            username: req.username,
            pixels: vec![PixelPlacement {
                x: req.x,
                y: req.y,
                color: req.color,
            }],
        }
    }
}

// -- Users --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub username: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    #[serde(flatten)]
    pub user: UserPresence,
    pub online: bool,
}

// -- Chat --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMessageRequest {
    pub message: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}
