use std::str::FromStr;

use chrono::Duration;
use thiserror::Error;

use crate::keys;

/// How room names that contain a path separator are handled when building keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoomPolicy {
    /// Reject the request with a validation error.
    #[default]
    Reject,
    /// Percent-escape `%` and `/` so the room stays a single key segment.
    Escape,
}

impl FromStr for RoomPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "escape" => Ok(Self::Escape),
            other => Err(format!("unknown room policy '{}' (expected reject|escape)", other)),
        }
    }
}

/// Order of the chat history returned by `MessageLog::list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatOrder {
    #[default]
    OldestFirst,
    NewestFirst,
}

impl FromStr for ChatOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "oldest" | "oldest-first" => Ok(Self::OldestFirst),
            "newest" | "newest-first" => Ok(Self::NewestFirst),
            other => Err(format!("unknown chat order '{}' (expected oldest|newest)", other)),
        }
    }
}

/// Everything that used to differ between deployments.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub width: u32,
    pub height: u32,
    /// Color of cells nobody has painted.
    pub background: String,
    pub online_timeout: Duration,
    pub max_messages: usize,
    pub max_message_chars: usize,
    pub dedup_capacity: usize,
    /// Entries evicted at once when the dedup set overflows.
    pub dedup_evict_batch: usize,
    pub require_presence_for_writes: bool,
    pub cache_enabled: bool,
    /// `None` keeps cached canvases until patched or invalidated.
    pub cache_ttl: Option<Duration>,
    pub room_policy: RoomPolicy,
    pub chat_order: ChatOrder,
    /// Delete stored messages beyond `max_messages` after each append.
    pub prune_on_append: bool,
    pub reset_clears_chat: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            width: 100,
            height: 100,
            background: "#ffffff".to_string(),
            online_timeout: Duration::seconds(30),
            max_messages: 100,
            max_message_chars: 500,
            dedup_capacity: 1000,
            dedup_evict_batch: 200,
            require_presence_for_writes: false,
            cache_enabled: true,
            cache_ttl: None,
            room_policy: RoomPolicy::Reject,
            chat_order: ChatOrder::OldestFirst,
            prune_on_append: true,
            reset_clears_chat: false,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid engine config: {0}")]
pub struct ConfigError(pub String);

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError(format!(
                "canvas must be at least 1x1, got {}x{}",
                self.width, self.height
            )));
        }
        if !keys::is_hex_color(&self.background) {
            return Err(ConfigError(format!("background '{}' is not #rrggbb", self.background)));
        }
        if self.online_timeout <= Duration::zero() {
            return Err(ConfigError("online timeout must be positive".into()));
        }
        if self.max_messages == 0 || self.max_message_chars == 0 {
            return Err(ConfigError("message limits must be positive".into()));
        }
        if self.dedup_capacity == 0 {
            return Err(ConfigError("dedup capacity must be positive".into()));
        }
        if self.dedup_evict_batch == 0 || self.dedup_evict_batch > self.dedup_capacity {
            return Err(ConfigError(format!(
                "dedup evict batch must be within 1..={}, got {}",
                self.dedup_capacity, self.dedup_evict_batch
            )));
        }
        if let Some(ttl) = self.cache_ttl {
            if ttl <= Duration::zero() {
                return Err(ConfigError("cache TTL must be positive".into()));
            }
        }
        Ok(())
    }
}
