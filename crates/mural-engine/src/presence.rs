use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Duration;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use mural_types::models::UserPresence;

use crate::clock::Clock;
use crate::error::{EngineError, Result};
use crate::keys;
use crate::store::{Namespace, RecordStore};

/// Stable per-user color: the first three bytes of SHA-256(id).
pub fn color_for(user_id: &str) -> String {
    let digest = Sha256::digest(user_id.as_bytes());
    format!("#{}", hex::encode(&digest[..3]))
}

/// Upserts user records and answers "who is online".
pub struct PresenceTracker<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    /// Held across every load-modify-save so concurrent updates to one user
    /// cannot drop each other's changes.
    writes: Mutex<()>,
}

impl<S: RecordStore> PresenceTracker<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            store,
            clock,
            timeout,
            writes: Mutex::new(()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_online(&self, user: &UserPresence) -> bool {
        user.is_online(self.clock.now(), self.timeout)
    }

    fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create or refresh a user; stats and color of an existing record survive.
    pub fn join(&self, id: &str, name: &str) -> Result<UserPresence> {
        keys::validate_user_id(id)?;
        let name = keys::validate_user_name(name)?;

        let _guard = self.write_lock();
        let now = self.clock.now();
        let user = match self.load(id)? {
            Some(mut user) => {
                name.clone_into(&mut user.name);
                user.last_seen_at = now;
                user.departed = false;
                user
            }
            None => UserPresence {
                id: id.to_string(),
                name: name.to_string(),
                color: color_for(id),
                last_seen_at: now,
                placed_count: 0,
                departed: false,
            },
        };
        self.save(&user)?;
        debug!("{} ({}) joined", user.name, user.id);
        Ok(user)
    }

    /// Keep a known user alive.
    pub fn touch(&self, id: &str) -> Result<UserPresence> {
        keys::validate_user_id(id)?;
        let _guard = self.write_lock();
        let mut user = self.load_existing(id)?;
        user.last_seen_at = self.clock.now();
        user.departed = false;
        self.save(&user)?;
        Ok(user)
    }

    /// Activity from a pixel placement or chat post. Creates the user when
    /// unknown and adds `placed` to their pixel count.
    pub fn record_activity(&self, id: &str, name: &str, placed: u64) -> Result<UserPresence> {
        keys::validate_user_id(id)?;
        let _guard = self.write_lock();
        let now = self.clock.now();
        let mut user = match self.load(id)? {
            Some(user) => user,
            None => UserPresence {
                id: id.to_string(),
                name: keys::validate_user_name(name).unwrap_or(id).to_string(),
                color: color_for(id),
                last_seen_at: now,
                placed_count: 0,
                departed: false,
            },
        };
        user.last_seen_at = now;
        user.departed = false;
        user.placed_count += placed;
        self.save(&user)?;
        Ok(user)
    }

    /// Mark a user offline at once. The record and its stats are kept.
    pub fn leave(&self, id: &str) -> Result<UserPresence> {
        keys::validate_user_id(id)?;
        let _guard = self.write_lock();
        let mut user = self.load_existing(id)?;
        user.last_seen_at = self.clock.now();
        user.departed = true;
        self.save(&user)?;
        debug!("{} ({}) left", user.name, user.id);
        Ok(user)
    }

    /// Direct lookup; offline users are still returned. An unreadable store
    /// reads as an unknown user.
    pub fn get(&self, id: &str) -> Result<UserPresence> {
        keys::validate_user_id(id)?;
        let user = self.load(id).unwrap_or_else(|e| {
            warn!("User lookup failed for '{}': {}", id, e);
            None
        });
        user.ok_or_else(|| EngineError::NotFound(format!("user {}", id)))
    }

    pub fn list_all(&self) -> Vec<UserPresence> {
        let rows = match self.store.scan(Namespace::Users, "") {
            Ok(rows) => rows,
            Err(e) => {
                warn!("User scan failed, serving empty list: {:#}", e);
                return Vec::new();
            }
        };
        rows.into_iter()
            .filter_map(|(key, value)| match serde_json::from_slice::<UserPresence>(&value) {
                Ok(user) => Some(user),
                Err(e) => {
                    warn!("Corrupt user record '{}', dropping it: {}", key, e);
                    self.discard(&key);
                    None
                }
            })
            .collect()
    }

    pub fn list_online(&self) -> Vec<UserPresence> {
        let now = self.clock.now();
        self.list_all()
            .into_iter()
            .filter(|u| u.is_online(now, self.timeout))
            .collect()
    }

    fn load_existing(&self, id: &str) -> Result<UserPresence> {
        self.load(id)?
            .ok_or_else(|| EngineError::NotFound(format!("user {}", id)))
    }

    /// `Ok(None)` for a missing record, and for a corrupt one, which is
    /// dropped so the next upsert starts fresh. A failed read is an error:
    /// callers that write must not mistake it for a new user.
    fn load(&self, id: &str) -> Result<Option<UserPresence>> {
        let Some(value) = self.store.get(Namespace::Users, id)? else {
            return Ok(None);
        };
        match serde_json::from_slice(&value) {
            Ok(user) => Ok(Some(user)),
            Err(e) => {
                warn!("Corrupt user record '{}', dropping it: {}", id, e);
                self.discard(id);
                Ok(None)
            }
        }
    }

    fn save(&self, user: &UserPresence) -> Result<()> {
        let value = serde_json::to_vec(user)?;
        self.store.put(Namespace::Users, &user.id, &value)?;
        Ok(())
    }

    fn discard(&self, key: &str) {
        if let Err(e) = self.store.delete(Namespace::Users, key) {
            warn!("Failed to drop corrupt user record '{}': {:#}", key, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn setup() -> (Arc<MemoryStore>, Arc<ManualClock>, PresenceTracker<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let tracker = PresenceTracker::new(store.clone(), clock.clone(), Duration::seconds(30));
        (store, clock, tracker)
    }

    #[test]
    fn color_is_stable_hex() {
        let c = color_for("u1");
        assert_eq!(c, color_for("u1"));
        assert!(keys::is_hex_color(&c));
        assert_ne!(c, color_for("u2"));
    }

    #[test]
    fn join_then_timeout() {
        let (_, clock, tracker) = setup();
        tracker.join("u1", "ada").unwrap();
        assert_eq!(tracker.list_online().len(), 1);

        clock.advance(Duration::seconds(30));
        assert_eq!(tracker.list_online().len(), 1);
        clock.advance(Duration::seconds(1));
        assert!(tracker.list_online().is_empty());
        assert_eq!(tracker.get("u1").unwrap().name, "ada");
    }

    #[test]
    fn activity_counts_and_keeps_alive() {
        let (_, clock, tracker) = setup();
        tracker.record_activity("u1", "ada", 1).unwrap();
        clock.advance(Duration::seconds(20));
        let user = tracker.record_activity("u1", "ignored", 2).unwrap();
        assert_eq!(user.placed_count, 3);
        assert_eq!(user.name, "ada");

        clock.advance(Duration::seconds(20));
        assert_eq!(tracker.list_online().len(), 1);
        tracker.touch("u1").unwrap();
        clock.advance(Duration::seconds(29));
        assert_eq!(tracker.list_online().len(), 1);
    }

    #[test]
    fn leave_is_immediate_and_keeps_stats() {
        let (_, _, tracker) = setup();
        tracker.join("u1", "ada").unwrap();
        tracker.record_activity("u1", "ada", 4).unwrap();
        let left = tracker.leave("u1").unwrap();
        assert!(!tracker.is_online(&left));
        assert!(tracker.list_online().is_empty());
        assert_eq!(tracker.get("u1").unwrap().placed_count, 4);

        // Rejoining keeps the count and color.
        let back = tracker.join("u1", "ada2").unwrap();
        assert_eq!(back.placed_count, 4);
        assert_eq!(back.color, left.color);
        assert!(tracker.is_online(&back));
    }

    #[test]
    fn unknown_users() {
        let (_, _, tracker) = setup();
        assert!(matches!(tracker.get("ghost"), Err(EngineError::NotFound(_))));
        assert!(matches!(tracker.touch("ghost"), Err(EngineError::NotFound(_))));
        assert!(matches!(tracker.leave("ghost"), Err(EngineError::NotFound(_))));
        assert!(matches!(tracker.join("", "x"), Err(EngineError::Validation(_))));
    }

    #[test]
    fn corrupt_record_is_reinitialized() {
        let (store, _, tracker) = setup();
        store.put(Namespace::Users, "u1", b"{broken").unwrap();
        assert!(tracker.list_all().is_empty());

        store.put(Namespace::Users, "u1", b"{broken").unwrap();
        let user = tracker.join("u1", "ada").unwrap();
        assert_eq!(user.placed_count, 0);
        assert_eq!(tracker.get("u1").unwrap(), user);
    }

    #[test]
    fn failed_write_is_reported() {
        let (store, _, tracker) = setup();
        store.set_fail_writes(true);
        assert!(matches!(tracker.join("u1", "ada"), Err(EngineError::Storage(_))));
        store.set_fail_writes(false);
        assert!(tracker.get("u1").is_err());
    }

    #[test]
    fn read_outage_does_not_reset_stats() {
        let (store, _, tracker) = setup();
        tracker.record_activity("u1", "ada", 5).unwrap();

        store.set_fail_reads(true);
        assert!(matches!(tracker.join("u1", "ada"), Err(EngineError::Storage(_))));
        assert!(matches!(tracker.record_activity("u1", "ada", 1), Err(EngineError::Storage(_))));
        assert!(matches!(tracker.touch("u1"), Err(EngineError::Storage(_))));
        assert!(matches!(tracker.leave("u1"), Err(EngineError::Storage(_))));
        // Lookups degrade instead of failing.
        assert!(matches!(tracker.get("u1"), Err(EngineError::NotFound(_))));
        assert!(tracker.list_all().is_empty());
        store.set_fail_reads(false);

        assert_eq!(tracker.get("u1").unwrap().placed_count, 5);
    }

    #[test]
    fn concurrent_activity_is_not_lost() {
        let (_, _, tracker) = setup();
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..50 {
                        tracker.record_activity("u1", "ada", 1).unwrap();
                    }
                });
            }
        });
        assert_eq!(tracker.get("u1").unwrap().placed_count, 400);
    }
}
