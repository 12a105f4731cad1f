//! Canvas read cache.
//!
//! Readers get an `Arc<Canvas>` snapshot. Patches go through
//! `Arc::make_mut`, so a snapshot that has been handed out is copied rather
//! than mutated. Each room carries a generation counter that every patch and
//! invalidation bumps; a projection started before a bump is returned to its
//! caller but not cached.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use tracing::trace;

use mural_types::models::Canvas;

use crate::canvas::CanvasProjector;
use crate::clock::Clock;
use crate::keys::RoomKey;
use crate::store::RecordStore;

struct CachedCanvas {
    canvas: Arc<Canvas>,
    built_at: DateTime<Utc>,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CachedCanvas>,
    generations: HashMap<String, u64>,
}

impl CacheInner {
    fn generation(&self, room: &str) -> u64 {
        self.generations.get(room).copied().unwrap_or(0)
    }

    fn bump(&mut self, room: &str) {
        *self.generations.entry(room.to_string()).or_insert(0) += 1;
    }
}

pub struct ReadCache<S> {
    projector: Arc<CanvasProjector<S>>,
    clock: Arc<dyn Clock>,
    enabled: bool,
    ttl: Option<Duration>,
    inner: RwLock<CacheInner>,
}

impl<S: RecordStore> ReadCache<S> {
    pub fn new(
        projector: Arc<CanvasProjector<S>>,
        clock: Arc<dyn Clock>,
        enabled: bool,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            projector,
            clock,
            enabled,
            ttl,
            inner: RwLock::new(CacheInner::default()),
        }
    }

    fn is_fresh(&self, entry: &CachedCanvas, now: DateTime<Utc>) -> bool {
        self.ttl.is_none_or(|ttl| now - entry.built_at < ttl)
    }

    pub fn get(&self, room: &RoomKey) -> Arc<Canvas> {
        if !self.enabled {
            return Arc::new(self.projector.project(room));
        }

        let key = room.segment();
        let now = self.clock.now();
        let generation = {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = inner.entries.get(key) {
                if self.is_fresh(entry, now) {
                    return entry.canvas.clone();
                }
            }
            inner.generation(key)
        };

        trace!("Canvas cache miss for room '{}'", room.name());
        let canvas = Arc::new(self.projector.project(room));

        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.generation(key) == generation {
            inner.entries.insert(
                key.to_string(),
                CachedCanvas {
                    canvas: canvas.clone(),
                    built_at: now,
                },
            );
        }
        canvas
    }

    /// Apply one successful write to the cached grid, if there is one.
    pub fn patch(&self, room: &RoomKey, x: u32, y: u32, color: &str) {
        if !self.enabled {
            return;
        }
        let key = room.segment();
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.bump(key);
        if let Some(entry) = inner.entries.get_mut(key) {
            Arc::make_mut(&mut entry.canvas).paint(x, y, color);
        }
    }

    pub fn invalidate(&self, room: &RoomKey) {
        if !self.enabled {
            return;
        }
        let key = room.segment();
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.bump(key);
        inner.entries.remove(key);
    }

    /// Number of rooms currently cached.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::RoomPolicy;
    use crate::keys;
    use crate::store::{MemoryStore, Namespace};
    use mural_types::models::PixelRecord;

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        projector: Arc<CanvasProjector<MemoryStore>>,
        room: RoomKey,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        Fixture {
            projector: Arc::new(CanvasProjector::new(store.clone(), 4, 4, "#ffffff")),
            store,
            clock: Arc::new(ManualClock::new(Utc::now())),
            room: keys::room_key("r1", RoomPolicy::Reject).unwrap(),
        }
    }

    fn write(f: &Fixture, x: u32, y: u32, color: &str) {
        f.projector
            .write(
                &f.room,
                &PixelRecord {
                    x,
                    y,
                    color: color.into(),
                    author_id: "u1".into(),
                    author_name: "ada".into(),
                    written_at: Utc::now(),
                },
            )
            .unwrap();
    }

    #[test]
    fn hit_returns_same_snapshot() {
        let f = fixture();
        let cache = ReadCache::new(f.projector.clone(), f.clock.clone(), true, None);
        let a = cache.get(&f.room);
        let b = cache.get(&f.room);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn patch_copies_handed_out_snapshot() {
        let f = fixture();
        let cache = ReadCache::new(f.projector.clone(), f.clock.clone(), true, None);
        let before = cache.get(&f.room);

        write(&f, 1, 2, "#00ff00");
        cache.patch(&f.room, 1, 2, "#00ff00");

        assert_eq!(before.color_at(1, 2), Some("#ffffff"));
        assert_eq!(cache.get(&f.room).color_at(1, 2), Some("#00ff00"));
    }

    #[test]
    fn ttl_expiry_recomputes() {
        let f = fixture();
        let cache = ReadCache::new(
            f.projector.clone(),
            f.clock.clone(),
            true,
            Some(Duration::seconds(5)),
        );
        cache.get(&f.room);

        // Written behind the cache's back.
        write(&f, 0, 0, "#000000");
        f.clock.advance(Duration::seconds(4));
        assert_eq!(cache.get(&f.room).color_at(0, 0), Some("#ffffff"));
        f.clock.advance(Duration::seconds(1));
        assert_eq!(cache.get(&f.room).color_at(0, 0), Some("#000000"));
    }

    #[test]
    fn invalidate_drops_entry() {
        let f = fixture();
        let cache = ReadCache::new(f.projector.clone(), f.clock.clone(), true, None);
        write(&f, 3, 3, "#111111");
        assert_eq!(cache.get(&f.room).color_at(3, 3), Some("#111111"));

        f.store.delete(Namespace::Canvas, "r1/3:3").unwrap();
        cache.invalidate(&f.room);
        assert!(cache.is_empty());
        assert_eq!(cache.get(&f.room).color_at(3, 3), Some("#ffffff"));
    }

    #[test]
    fn disabled_cache_reads_through() {
        let f = fixture();
        let cache = ReadCache::new(f.projector.clone(), f.clock.clone(), false, None);
        cache.get(&f.room);
        write(&f, 2, 2, "#222222");
        cache.patch(&f.room, 2, 2, "#222222");
        assert!(cache.is_empty());
        assert_eq!(cache.get(&f.room).color_at(2, 2), Some("#222222"));
    }

    #[test]
    fn concurrent_patches_and_reads() {
        let f = fixture();
        let cache = Arc::new(ReadCache::new(f.projector.clone(), f.clock.clone(), true, None));
        let store = f.store.clone();
        let room = f.room.clone();

        let writers: Vec<_> = (0..4u32)
            .map(|x| {
                let cache = cache.clone();
                let projector = f.projector.clone();
                let room = room.clone();
                std::thread::spawn(move || {
                    for y in 0..4u32 {
                        let record = PixelRecord {
                            x,
                            y,
                            color: "#abcdef".into(),
                            author_id: "u".into(),
                            author_name: "u".into(),
                            written_at: Utc::now(),
                        };
                        projector.write(&room, &record).unwrap();
                        cache.patch(&room, x, y, "#abcdef");
                        let _ = cache.get(&room);
                    }
                })
            })
            .collect();
        for w in writers {
            w.join().unwrap();
        }

        assert_eq!(store.len(Namespace::Canvas), 16);
        let canvas = cache.get(&room);
        assert!(canvas.grid.iter().flatten().all(|c| c == "#abcdef"));
    }
}
