use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, anyhow};
use chrono::Duration;

use mural_engine::EngineConfig;

/// Process settings read from `MURAL_*` environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub engine: EngineConfig,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unset variables keep their defaults; set but unparsable ones are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = EngineConfig::default();
        let text = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let engine = EngineConfig {
            width: value(&lookup, "MURAL_CANVAS_WIDTH")?.unwrap_or(defaults.width),
            height: value(&lookup, "MURAL_CANVAS_HEIGHT")?.unwrap_or(defaults.height),
            background: text("MURAL_BACKGROUND").unwrap_or(defaults.background),
            online_timeout: value(&lookup, "MURAL_ONLINE_TIMEOUT_SECS")?
                .map(Duration::seconds)
                .unwrap_or(defaults.online_timeout),
            max_messages: value(&lookup, "MURAL_MAX_MESSAGES")?.unwrap_or(defaults.max_messages),
            max_message_chars: value(&lookup, "MURAL_MAX_MESSAGE_CHARS")?
                .unwrap_or(defaults.max_message_chars),
            dedup_capacity: value(&lookup, "MURAL_DEDUP_CAPACITY")?.unwrap_or(defaults.dedup_capacity),
            dedup_evict_batch: value(&lookup, "MURAL_DEDUP_EVICT_BATCH")?
                .unwrap_or(defaults.dedup_evict_batch),
            require_presence_for_writes: value(&lookup, "MURAL_REQUIRE_PRESENCE")?
                .unwrap_or(defaults.require_presence_for_writes),
            cache_enabled: value(&lookup, "MURAL_CACHE")?.unwrap_or(defaults.cache_enabled),
            cache_ttl: value(&lookup, "MURAL_CACHE_TTL_MS")?
                .map(Duration::milliseconds)
                .or(defaults.cache_ttl),
            room_policy: value(&lookup, "MURAL_ROOM_POLICY")?.unwrap_or(defaults.room_policy),
            chat_order: value(&lookup, "MURAL_CHAT_ORDER")?.unwrap_or(defaults.chat_order),
            prune_on_append: value(&lookup, "MURAL_PRUNE_ON_APPEND")?
                .unwrap_or(defaults.prune_on_append),
            reset_clears_chat: value(&lookup, "MURAL_RESET_CLEARS_CHAT")?
                .unwrap_or(defaults.reset_clears_chat),
        };
        engine.validate()?;

        Ok(Self {
            host: text("MURAL_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: value(&lookup, "MURAL_PORT")?.unwrap_or(3000),
            db_path: PathBuf::from(text("MURAL_DB_PATH").unwrap_or_else(|| "mural.db".into())),
            engine,
        })
    }
}

fn value<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<T>()
        .map(Some)
        .map_err(|e| anyhow!("{}", e))
        .with_context(|| format!("invalid {}='{}'", key, raw))
}
