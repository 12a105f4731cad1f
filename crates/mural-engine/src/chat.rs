use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use mural_types::models::ChatMessage;

use crate::clock::Clock;
use crate::config::ChatOrder;
use crate::error::{EngineError, Result};
use crate::keys::{self, RoomKey};
use crate::store::{Namespace, RecordStore};

/// A message before the log has assigned its identity.
#[derive(Debug, Clone, Default)]
pub struct MessageDraft {
    pub id: Option<String>,
    pub author_id: String,
    pub author_name: String,
    pub body: String,
    pub written_at: Option<DateTime<Utc>>,
}

pub struct MessageLimits {
    pub max_messages: usize,
    pub max_chars: usize,
    pub order: ChatOrder,
    pub prune_on_append: bool,
}

/// Append-only chat history, bounded per room.
pub struct MessageLog<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    limits: MessageLimits,
    last_id: AtomicI64,
}

impl<S: RecordStore> MessageLog<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, limits: MessageLimits) -> Self {
        Self {
            store,
            clock,
            limits,
            last_id: AtomicI64::new(0),
        }
    }

    /// Nanosecond clock reading, bumped past the previous id so ids are
    /// strictly increasing even when the clock stalls.
    fn next_id(&self) -> String {
        let nanos = self.clock.now().timestamp_nanos_opt().unwrap_or(i64::MAX);
        let prev = self
            .last_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
                Some(nanos.max(prev.saturating_add(1)))
            })
            .unwrap_or_else(|prev| prev);
        nanos.max(prev.saturating_add(1)).to_string()
    }

    pub fn append(&self, room: &RoomKey, draft: MessageDraft) -> Result<ChatMessage> {
        let body = keys::sanitize_body(&draft.body, self.limits.max_chars);
        if body.trim().is_empty() {
            return Err(EngineError::validation("message body is empty"));
        }

        let id = match draft.id {
            Some(id) if !id.is_empty() => {
                if id.contains('/') || id.len() > 64 {
                    return Err(EngineError::validation("invalid message id"));
                }
                id
            }
            _ => self.next_id(),
        };

        let message = ChatMessage {
            id,
            room: room.name().to_string(),
            author_id: draft.author_id,
            author_name: draft.author_name,
            body,
            written_at: draft.written_at.unwrap_or_else(|| self.clock.now()),
        };

        let value = serde_json::to_vec(&message)?;
        self.store
            .put(Namespace::Chat, &keys::message_key(room, &message.id), &value)?;

        if self.limits.prune_on_append {
            if let Err(e) = self.prune(room) {
                warn!("Chat prune failed for room '{}': {}", room.name(), e);
            }
        }
        Ok(message)
    }

    /// The most recent `max_messages` messages of the room, in configured order.
    pub fn list(&self, room: &RoomKey) -> Vec<ChatMessage> {
        let mut messages: Vec<ChatMessage> = self
            .load(room)
            .into_iter()
            .map(|(_, message)| message)
            .collect();

        let excess = messages.len().saturating_sub(self.limits.max_messages);
        messages.drain(..excess);

        if self.limits.order == ChatOrder::NewestFirst {
            messages.reverse();
        }
        messages
    }

    /// Delete stored messages older than the retained window.
    pub fn prune(&self, room: &RoomKey) -> Result<usize> {
        let messages = self.load(room);
        let excess = messages.len().saturating_sub(self.limits.max_messages);
        for (key, _) in &messages[..excess] {
            self.store.delete(Namespace::Chat, key)?;
        }
        if excess > 0 {
            debug!("Pruned {} chat messages in room '{}'", excess, room.name());
        }
        Ok(excess)
    }

    pub fn clear(&self, room: &RoomKey) -> Result<usize> {
        Ok(self.store.delete_prefix(Namespace::Chat, &room.prefix())?)
    }

    /// Every readable message with its key, oldest first. Equal timestamps
    /// keep key order, which is arrival order for generated ids.
    fn load(&self, room: &RoomKey) -> Vec<(String, ChatMessage)> {
        let rows = match self.store.scan(Namespace::Chat, &room.prefix()) {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Chat scan failed for room '{}', serving empty history: {:#}", room.name(), e);
                return Vec::new();
            }
        };

        let mut messages: Vec<(String, ChatMessage)> = rows
            .into_iter()
            .filter_map(|(key, value)| match serde_json::from_slice::<ChatMessage>(&value) {
                Ok(message) => Some((key, message)),
                Err(e) => {
                    warn!("Corrupt chat record '{}', dropping it: {}", key, e);
                    if let Err(e) = self.store.delete(Namespace::Chat, &key) {
                        warn!("Failed to drop corrupt chat record '{}': {:#}", key, e);
                    }
                    None
                }
            })
            .collect();
        messages.sort_by_key(|(_, m)| m.written_at);
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::RoomPolicy;
    use crate::store::MemoryStore;
    use chrono::Duration;

    fn log_with(
        max_messages: usize,
        order: ChatOrder,
        prune_on_append: bool,
    ) -> (Arc<MemoryStore>, Arc<ManualClock>, MessageLog<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let log = MessageLog::new(
            store.clone(),
            clock.clone(),
            MessageLimits {
                max_messages,
                max_chars: 500,
                order,
                prune_on_append,
            },
        );
        (store, clock, log)
    }

    fn draft(body: &str) -> MessageDraft {
        MessageDraft {
            author_id: "u1".into(),
            author_name: "ada".into(),
            body: body.into(),
            ..Default::default()
        }
    }

    fn room() -> RoomKey {
        keys::room_key("r1", RoomPolicy::Reject).unwrap()
    }

    #[test]
    fn assigns_increasing_ids_on_a_stalled_clock() {
        let (_, _, log) = log_with(10, ChatOrder::OldestFirst, false);
        let a = log.append(&room(), draft("a")).unwrap();
        let b = log.append(&room(), draft("b")).unwrap();
        assert!(b.id.parse::<i64>().unwrap() > a.id.parse::<i64>().unwrap());
        assert_eq!(a.written_at, b.written_at);

        let bodies: Vec<_> = log.list(&room()).into_iter().map(|m| m.body).collect();
        assert_eq!(bodies, vec!["a", "b"]);
    }

    #[test]
    fn keeps_caller_supplied_identity() {
        let (_, clock, log) = log_with(10, ChatOrder::OldestFirst, false);
        let at = clock.now() - Duration::minutes(5);
        let message = log
            .append(
                &room(),
                MessageDraft {
                    id: Some("m-1".into()),
                    written_at: Some(at),
                    ..draft("hi")
                },
            )
            .unwrap();
        assert_eq!(message.id, "m-1");
        assert_eq!(message.written_at, at);
    }

    #[test]
    fn list_sorts_by_timestamp_and_bounds() {
        let (_, clock, log) = log_with(3, ChatOrder::OldestFirst, false);
        let base = clock.now();
        for (i, offset) in [5, 1, 4, 2, 3].into_iter().enumerate() {
            log.append(
                &room(),
                MessageDraft {
                    id: Some(format!("{}", i + 1)),
                    written_at: Some(base + Duration::seconds(offset)),
                    ..draft(&format!("t{}", offset))
                },
            )
            .unwrap();
        }
        let bodies: Vec<_> = log.list(&room()).into_iter().map(|m| m.body).collect();
        assert_eq!(bodies, vec!["t3", "t4", "t5"]);
    }

    #[test]
    fn newest_first_order() {
        let (_, clock, log) = log_with(2, ChatOrder::NewestFirst, false);
        for body in ["one", "two", "three"] {
            clock.advance(Duration::seconds(1));
            log.append(&room(), draft(body)).unwrap();
        }
        let bodies: Vec<_> = log.list(&room()).into_iter().map(|m| m.body).collect();
        assert_eq!(bodies, vec!["three", "two"]);
    }

    #[test]
    fn prune_on_append_bounds_storage() {
        let (store, _, log) = log_with(5, ChatOrder::OldestFirst, true);
        for i in 0..12 {
            log.append(&room(), draft(&format!("m{}", i))).unwrap();
        }
        assert_eq!(store.len(Namespace::Chat), 5);
        assert_eq!(log.list(&room())[0].body, "m7");
    }

    #[test]
    fn sanitizes_and_rejects_empty() {
        let (_, _, log) = log_with(5, ChatOrder::OldestFirst, false);
        let m = log.append(&room(), draft("<script>hey")).unwrap();
        assert_eq!(m.body, ">hey");
        assert!(matches!(
            log.append(&room(), draft("<script")),
            Err(EngineError::Validation(_))
        ));
        assert!(log.append(&room(), draft("   ")).is_err());
    }

    #[test]
    fn rooms_are_separate_and_clearable() {
        let (_, _, log) = log_with(5, ChatOrder::OldestFirst, false);
        let other = keys::room_key("r2", RoomPolicy::Reject).unwrap();
        log.append(&room(), draft("a")).unwrap();
        log.append(&other, draft("b")).unwrap();
        assert_eq!(log.clear(&room()).unwrap(), 1);
        assert!(log.list(&room()).is_empty());
        assert_eq!(log.list(&other).len(), 1);
    }

    #[test]
    fn storage_failures() {
        let (store, _, log) = log_with(5, ChatOrder::OldestFirst, false);
        log.append(&room(), draft("kept")).unwrap();

        store.set_fail_writes(true);
        assert!(matches!(log.append(&room(), draft("lost")), Err(EngineError::Storage(_))));
        store.set_fail_writes(false);
        assert_eq!(log.list(&room()).len(), 1);

        store.set_fail_reads(true);
        assert!(log.list(&room()).is_empty());
    }
}
