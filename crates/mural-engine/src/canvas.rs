use std::sync::Arc;

use tracing::{debug, warn};

use mural_types::models::{Canvas, PixelRecord};

use crate::error::{EngineError, Result};
use crate::keys::{self, RoomKey};
use crate::store::{Namespace, RecordStore};

/// Projects per-cell records onto a dense grid and persists validated writes.
pub struct CanvasProjector<S> {
    store: Arc<S>,
    width: u32,
    height: u32,
    background: String,
}

impl<S: RecordStore> CanvasProjector<S> {
    pub fn new(store: Arc<S>, width: u32, height: u32, background: impl Into<String>) -> Self {
        Self {
            store,
            width,
            height,
            background: background.into(),
        }
    }

    pub fn blank(&self) -> Canvas {
        Canvas::blank(self.width, self.height, &self.background)
    }

    /// Bounds and color check for a requested placement.
    pub fn validate(&self, x: i64, y: i64, color: &str) -> Result<(u32, u32)> {
        let cell = self.locate(x, y)?;
        keys::validate_color(color)?;
        Ok(cell)
    }

    /// Bounds check only.
    pub fn locate(&self, x: i64, y: i64) -> Result<(u32, u32)> {
        let in_range = |v: i64, limit: u32| u32::try_from(v).ok().filter(|v| *v < limit);
        match (in_range(x, self.width), in_range(y, self.height)) {
            (Some(cx), Some(cy)) => Ok((cx, cy)),
            _ => Err(EngineError::validation(format!(
                "pixel ({}, {}) outside {}x{} canvas",
                x, y, self.width, self.height
            ))),
        }
    }

    /// Current grid for a room. Never fails: an unreadable store yields the
    /// blank canvas, and unusable records are skipped.
    pub fn project(&self, room: &RoomKey) -> Canvas {
        let mut canvas = self.blank();

        let rows = match self.store.scan(Namespace::Canvas, &room.prefix()) {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Canvas scan failed for room '{}', serving blank canvas: {:#}", room.name(), e);
                return canvas;
            }
        };

        for (key, value) in rows {
            let Some((x, y)) = keys::parse_pixel_key(room, &key) else {
                debug!("Skipping malformed canvas key '{}'", key);
                continue;
            };
            if !canvas.contains(x, y) {
                debug!("Skipping out-of-range pixel {} in room '{}'", key, room.name());
                continue;
            }
            match serde_json::from_slice::<PixelRecord>(&value) {
                Ok(record) if keys::is_hex_color(&record.color) => {
                    canvas.paint(x, y, &record.color);
                }
                Ok(record) => {
                    debug!("Skipping pixel {} with bad color '{}'", key, record.color);
                }
                Err(e) => {
                    warn!("Corrupt pixel record '{}', dropping it: {}", key, e);
                    self.discard(&key);
                }
            }
        }

        canvas
    }

    /// Persist a record at its cell, replacing whatever was there.
    pub fn write(&self, room: &RoomKey, record: &PixelRecord) -> Result<()> {
        self.validate(record.x.into(), record.y.into(), &record.color)?;
        let value = serde_json::to_vec(record)?;
        self.store
            .put(Namespace::Canvas, &keys::pixel_key(room, record.x, record.y), &value)?;
        Ok(())
    }

    /// Stored record for one cell, if anyone painted it.
    pub fn cell(&self, room: &RoomKey, x: i64, y: i64) -> Result<Option<PixelRecord>> {
        let (x, y) = self.locate(x, y)?;
        let key = keys::pixel_key(room, x, y);
        let value = match self.store.get(Namespace::Canvas, &key) {
            Ok(value) => value,
            Err(e) => {
                warn!("Pixel lookup failed for '{}': {:#}", key, e);
                return Ok(None);
            }
        };
        match value.map(|v| serde_json::from_slice::<PixelRecord>(&v)) {
            Some(Ok(record)) => Ok(Some(record)),
            Some(Err(e)) => {
                warn!("Corrupt pixel record '{}', dropping it: {}", key, e);
                self.discard(&key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Remove every record of the room. Returns how many were removed.
    pub fn reset(&self, room: &RoomKey) -> Result<usize> {
        Ok(self.store.delete_prefix(Namespace::Canvas, &room.prefix())?)
    }

    fn discard(&self, key: &str) {
        if let Err(e) = self.store.delete(Namespace::Canvas, key) {
            warn!("Failed to drop corrupt pixel record '{}': {:#}", key, e);
        }
    }
}
