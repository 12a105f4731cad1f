use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::api::{JoinRequest, PlacePixelsRequest, PostMessageRequest};
use crate::models::{ChatMessage, PixelRecord, UserPresence};

/// Named pub/sub channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "pixelupdates")]
    Pixels,
    #[serde(rename = "chatmessages")]
    Chat,
    #[serde(rename = "userupdates")]
    Users,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pixels => "pixelupdates",
            Self::Chat => "chatmessages",
            Self::Users => "userupdates",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pixelupdates" => Ok(Self::Pixels),
            "chatmessages" => Ok(Self::Chat),
            "userupdates" => Ok(Self::Users),
            other => Err(format!("unknown topic: {}", other)),
        }
    }
}

/// Payloads published to other replicas and connected clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RoomEvent {
    PixelsPlaced { room: String, pixels: Vec<PixelRecord> },
    CanvasReset { room: String },
    MessageCreated(ChatMessage),
    UserUpdated { user: UserPresence, online: bool },
}

impl RoomEvent {
    pub fn topic(&self) -> Topic {
        match self {
            Self::PixelsPlaced { .. } | Self::CanvasReset { .. } => Topic::Pixels,
            Self::MessageCreated(_) => Topic::Chat,
            Self::UserUpdated { .. } => Topic::Users,
        }
    }

    /// Room this event is scoped to. `None` means every room.
    pub fn room(&self) -> Option<&str> {
        match self {
            Self::PixelsPlaced { room, .. } | Self::CanvasReset { room } => Some(room),
            Self::MessageCreated(msg) => Some(&msg.room),
            Self::UserUpdated { .. } => None,
        }
    }
}

/// Frames sent FROM clients over the gateway socket (or raw pub/sub deliveries).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    PlacePixels(PlacePixelsRequest),
    Join(JoinRequest),
    Leave { user_id: String },
    Chat(PostMessageRequest),
    Heartbeat { user_id: String },
}

/// Direct reply to the socket that sent a frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayReply {
    Accepted,
    Duplicate,
    Rejected { reason: String },
}
