use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One painted cell. Identity is `(room, x, y)`; a later write to the same
/// cell replaces the stored record outright.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PixelRecord {
    pub x: u32,
    pub y: u32,
    pub color: String,
    pub author_id: String,
    pub author_name: String,
    pub written_at: DateTime<Utc>,
}

/// Dense projection of a room's pixel records. Never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
    /// Row-major: `grid[y][x]`.
    pub grid: Vec<Vec<String>>,
}

impl Canvas {
    /// A `width` x `height` canvas filled with `background`.
    pub fn blank(width: u32, height: u32, background: &str) -> Self {
        let row = vec![background.to_string(); width as usize];
        Self {
            width,
            height,
            grid: vec![row; height as usize],
        }
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height
    }

    pub fn color_at(&self, x: u32, y: u32) -> Option<&str> {
        self.grid
            .get(y as usize)
            .and_then(|row| row.get(x as usize))
            .map(String::as_str)
    }

    /// Paint a cell. Returns false (and changes nothing) when out of bounds.
    pub fn paint(&mut self, x: u32, y: u32, color: &str) -> bool {
        match self.grid.get_mut(y as usize).and_then(|row| row.get_mut(x as usize)) {
            Some(cell) => {
                color.clone_into(cell);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub room: String,
    pub author_id: String,
    pub author_name: String,
    pub body: String,
    pub written_at: DateTime<Utc>,
}

/// Stored user record. Online status is derived from `last_seen_at`, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPresence {
    pub id: String,
    pub name: String,
    pub color: String,
    pub last_seen_at: DateTime<Utc>,
    pub placed_count: u64,
    /// Set by an explicit leave, cleared by the next join or activity.
    #[serde(default)]
    pub departed: bool,
}

impl UserPresence {
    pub fn is_online(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        !self.departed && now - self.last_seen_at <= timeout
    }
}
