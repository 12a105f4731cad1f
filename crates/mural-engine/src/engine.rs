use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use mural_types::api::{PlacePixelRequest, PlacePixelsRequest, PostMessageRequest};
use mural_types::events::{ClientFrame, RoomEvent, Topic};
use mural_types::models::{Canvas, ChatMessage, PixelRecord, UserPresence};

use crate::cache::ReadCache;
use crate::canvas::CanvasProjector;
use crate::chat::{MessageDraft, MessageLimits, MessageLog};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::dedup::DedupGuard;
use crate::error::{EngineError, Result};
use crate::keys::{self, RoomKey};
use crate::presence::PresenceTracker;
use crate::publish::Publisher;
use crate::store::RecordStore;

const ANONYMOUS_ID: &str = "anonymous";
const ANONYMOUS_NAME: &str = "Anonymous";

/// Outcome of a pixel write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    Applied(Vec<PixelRecord>),
    /// The batch token was seen before; nothing was persisted or published.
    Duplicate,
}

/// Outcome of an ingested client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingested {
    Pixels(Placement),
    Joined(UserPresence),
    Left(UserPresence),
    Posted(ChatMessage),
    Touched(UserPresence),
}

/// One engine per process, shared by every request handler and socket.
pub struct Engine<S, P> {
    config: EngineConfig,
    publisher: P,
    clock: Arc<dyn Clock>,
    dedup: DedupGuard,
    canvas: Arc<CanvasProjector<S>>,
    cache: ReadCache<S>,
    presence: PresenceTracker<S>,
    chat: MessageLog<S>,
}

impl<S: RecordStore, P: Publisher> Engine<S, P> {
    pub fn new(config: EngineConfig, store: Arc<S>, publisher: P, clock: Arc<dyn Clock>) -> Result<Self> {
        config
            .validate()
            .map_err(|e| EngineError::Validation(e.to_string()))?;

        let canvas = Arc::new(CanvasProjector::new(
            store.clone(),
            config.width,
            config.height,
            config.background.clone(),
        ));
        let cache = ReadCache::new(canvas.clone(), clock.clone(), config.cache_enabled, config.cache_ttl);
        let presence = PresenceTracker::new(store.clone(), clock.clone(), config.online_timeout);
        let chat = MessageLog::new(
            store,
            clock.clone(),
            MessageLimits {
                max_messages: config.max_messages,
                max_chars: config.max_message_chars,
                order: config.chat_order,
                prune_on_append: config.prune_on_append,
            },
        );

        info!(
            "Engine ready: {}x{} canvas, online timeout {}s, {} messages kept, dedup capacity {}",
            config.width,
            config.height,
            config.online_timeout.num_seconds(),
            config.max_messages,
            config.dedup_capacity
        );

        Ok(Self {
            dedup: DedupGuard::new(config.dedup_capacity, config.dedup_evict_batch),
            config,
            publisher,
            clock,
            canvas,
            cache,
            presence,
            chat,
        })
    }

    pub fn with_system_clock(config: EngineConfig, store: Arc<S>, publisher: P) -> Result<Self> {
        Self::new(config, store, publisher, Arc::new(SystemClock))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn dedup(&self) -> &DedupGuard {
        &self.dedup
    }

    fn room(&self, room: &str) -> Result<RoomKey> {
        keys::room_key(room, self.config.room_policy)
    }

    // -- Canvas --

    pub fn place_pixel(&self, room: &str, req: PlacePixelRequest) -> Result<Placement> {
        self.place_pixels(room, req.into())
    }

    /// The single write path for pixels. The whole batch is validated before
    /// anything is persisted; a redelivered batch is dropped silently.
    pub fn place_pixels(&self, room: &str, batch: PlacePixelsRequest) -> Result<Placement> {
        let room = self.room(room)?;
        if batch.pixels.is_empty() {
            return Err(EngineError::validation("batch contains no pixels"));
        }

        let (author_id, author_name) = match batch.user_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => {
                keys::validate_user_id(id)?;
                let name = match batch.username.as_deref() {
                    Some(name) => keys::validate_user_name(name)?.to_string(),
                    None => id.to_string(),
                };
                (id.to_string(), name)
            }
            None => (ANONYMOUS_ID.to_string(), ANONYMOUS_NAME.to_string()),
        };

        let mut cells = Vec::with_capacity(batch.pixels.len());
        for p in &batch.pixels {
            let (x, y) = self.canvas.validate(p.x, p.y, &p.color)?;
            cells.push((x, y, p.color.clone()));
        }

        let token = if batch.batch_id.is_empty() {
            String::new()
        } else {
            format!("{}:{}", batch.batch_id, batch.timestamp)
        };
        let now = self.clock.now();
        if !self.dedup.accept(&token, now) {
            debug!("Dropping redelivered batch {} in room '{}'", token, room.name());
            return Ok(Placement::Duplicate);
        }

        if self.config.require_presence_for_writes {
            let online = author_id != ANONYMOUS_ID
                && self
                    .presence
                    .get(&author_id)
                    .is_ok_and(|u| self.presence.is_online(&u));
            if !online {
                self.dedup.forget(&token);
                return Err(EngineError::validation(format!(
                    "user {} must be online to paint",
                    author_id
                )));
            }
        }

        let mut records = Vec::with_capacity(cells.len());
        for (x, y, color) in cells {
            let record = PixelRecord {
                x,
                y,
                color,
                author_id: author_id.clone(),
                author_name: author_name.clone(),
                written_at: now,
            };
            if let Err(e) = self.canvas.write(&room, &record) {
                // Earlier cells of the batch are stored; keep the cache in step
                // and let a redelivery retry the whole batch.
                self.dedup.forget(&token);
                for done in &records {
                    self.patch_cache(&room, done);
                }
                return Err(e);
            }
            records.push(record);
        }

        for record in &records {
            self.patch_cache(&room, record);
        }

        if author_id != ANONYMOUS_ID {
            if let Err(e) = self
                .presence
                .record_activity(&author_id, &author_name, records.len() as u64)
            {
                warn!("Failed to record activity for {}: {}", author_id, e);
            }
        }

        debug!(
            "{} placed {} pixel(s) in room '{}'",
            author_id,
            records.len(),
            room.name()
        );
        self.publish(&RoomEvent::PixelsPlaced {
            room: room.name().to_string(),
            pixels: records.clone(),
        });
        Ok(Placement::Applied(records))
    }

    fn patch_cache(&self, room: &RoomKey, record: &PixelRecord) {
        self.cache.patch(room, record.x, record.y, &record.color);
    }

    pub fn canvas(&self, room: &str) -> Result<Arc<Canvas>> {
        let room = self.room(room)?;
        Ok(self.cache.get(&room))
    }

    /// Who painted a cell, and when.
    pub fn pixel(&self, room: &str, x: i64, y: i64) -> Result<PixelRecord> {
        let room = self.room(room)?;
        self.canvas
            .cell(&room, x, y)?
            .ok_or_else(|| EngineError::NotFound(format!("pixel ({}, {}) in room {}", x, y, room.name())))
    }

    pub fn reset_room(&self, room: &str) -> Result<()> {
        let room = self.room(room)?;
        let result = self.canvas.reset(&room);
        // Even a partial reset has changed the store.
        self.cache.invalidate(&room);
        let removed = result?;

        if self.config.reset_clears_chat {
            self.chat.clear(&room)?;
        }

        info!("Room '{}' reset ({} pixels cleared)", room.name(), removed);
        self.publish(&RoomEvent::CanvasReset {
            room: room.name().to_string(),
        });
        Ok(())
    }

    // -- Presence --

    pub fn join(&self, user_id: &str, name: &str) -> Result<UserPresence> {
        let user = self.presence.join(user_id, name)?;
        self.publish_user(&user);
        Ok(user)
    }

    pub fn leave(&self, user_id: &str) -> Result<UserPresence> {
        let user = self.presence.leave(user_id)?;
        self.publish_user(&user);
        Ok(user)
    }

    pub fn touch(&self, user_id: &str) -> Result<UserPresence> {
        self.presence.touch(user_id)
    }

    pub fn user(&self, user_id: &str) -> Result<UserPresence> {
        self.presence.get(user_id)
    }

    pub fn online_users(&self) -> Vec<UserPresence> {
        self.presence.list_online()
    }

    pub fn users(&self) -> Vec<UserPresence> {
        self.presence.list_all()
    }

    pub fn is_online(&self, user: &UserPresence) -> bool {
        self.presence.is_online(user)
    }

    fn publish_user(&self, user: &UserPresence) {
        self.publish(&RoomEvent::UserUpdated {
            user: user.clone(),
            online: self.presence.is_online(user),
        });
    }

    // -- Chat --

    pub fn post_message(&self, room: &str, req: PostMessageRequest) -> Result<ChatMessage> {
        let room = self.room(room)?;
        let (author_id, author_name) = match req.user_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => {
                keys::validate_user_id(id)?;
                let name = match req.username.as_deref() {
                    Some(name) => keys::validate_user_name(name)?.to_string(),
                    None => self.presence.get(id).map(|u| u.name).unwrap_or_else(|_| id.to_string()),
                };
                (id.to_string(), name)
            }
            None => (ANONYMOUS_ID.to_string(), ANONYMOUS_NAME.to_string()),
        };

        let message = self.chat.append(
            &room,
            MessageDraft {
                author_id: author_id.clone(),
                author_name: author_name.clone(),
                body: req.message,
                ..Default::default()
            },
        )?;

        if author_id != ANONYMOUS_ID {
            if let Err(e) = self.presence.record_activity(&author_id, &author_name, 0) {
                warn!("Failed to record activity for {}: {}", author_id, e);
            }
        }

        self.publish(&RoomEvent::MessageCreated(message.clone()));
        Ok(message)
    }

    pub fn messages(&self, room: &str) -> Result<Vec<ChatMessage>> {
        let room = self.room(room)?;
        Ok(self.chat.list(&room))
    }

    // -- Pub/sub --

    /// Entry point for raw client frames (gateway sockets or pub/sub deliveries).
    pub fn ingest(&self, room: &str, raw: &[u8]) -> Result<Ingested> {
        let frame: ClientFrame = serde_json::from_slice(raw)
            .map_err(|e| EngineError::Validation(format!("malformed frame: {}", e)))?;

        match frame {
            ClientFrame::PlacePixels(batch) => self.place_pixels(room, batch).map(Ingested::Pixels),
            ClientFrame::Join(req) => self.join(&req.user_id, &req.username).map(Ingested::Joined),
            ClientFrame::Leave { user_id } => self.leave(&user_id).map(Ingested::Left),
            ClientFrame::Chat(req) => self.post_message(room, req).map(Ingested::Posted),
            ClientFrame::Heartbeat { user_id } => self.touch(&user_id).map(Ingested::Touched),
        }
    }

    /// Apply a payload published by another replica to local derived state.
    /// The store is shared, so only the read cache needs to follow.
    ///
    /// This is the entry point for a cross-replica transport: whatever
    /// carries another node's `Publisher` output feeds it here. A single
    /// node never calls it, since its own publishes already patch the cache.
    pub fn observe(&self, topic: Topic, raw: &[u8]) -> Result<()> {
        let event: RoomEvent = serde_json::from_slice(raw)
            .map_err(|e| EngineError::Validation(format!("malformed event: {}", e)))?;
        if event.topic() != topic {
            return Err(EngineError::validation(format!(
                "event does not belong on {}",
                topic
            )));
        }

        match event {
            RoomEvent::PixelsPlaced { room, pixels } => {
                let room = self.room(&room)?;
                for p in &pixels {
                    if self.canvas.validate(p.x.into(), p.y.into(), &p.color).is_ok() {
                        self.patch_cache(&room, p);
                    }
                }
            }
            RoomEvent::CanvasReset { room } => {
                let room = self.room(&room)?;
                self.cache.invalidate(&room);
            }
            RoomEvent::MessageCreated(_) | RoomEvent::UserUpdated { .. } => {}
        }
        Ok(())
    }

    /// Publishing happens after the store accepted the write; a transport
    /// failure is logged and does not undo it.
    fn publish(&self, event: &RoomEvent) {
        let payload = match serde_json::to_vec(event) {
            Ok(payload) => Bytes::from(payload),
            Err(e) => {
                warn!("Failed to encode {} event: {}", event.topic(), e);
                return;
            }
        };
        if let Err(e) = self.publisher.publish(event.topic(), event.room(), payload) {
            warn!("Publish to {} failed: {:#}", event.topic(), e);
        }
    }
}
