//! Bounded set of recently seen idempotency tokens.
//!
//! Guarantees are best-effort within a short window: once a token has been
//! evicted, a redelivery carrying it is accepted again.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use tracing::debug;

pub struct DedupGuard {
    capacity: usize,
    evict_batch: usize,
    inner: RwLock<DedupInner>,
}

#[derive(Default)]
struct DedupInner {
    /// token -> (insertion sequence, first seen)
    seen: HashMap<String, (u64, DateTime<Utc>)>,
    /// Insertion order. May hold stale entries for forgotten tokens; those
    /// are recognised by a sequence mismatch and skipped.
    order: VecDeque<(u64, String)>,
    next_seq: u64,
}

impl DedupInner {
    fn evict_oldest(&mut self, count: usize) -> usize {
        let mut evicted = 0;
        while evicted < count {
            let Some((seq, token)) = self.order.pop_front() else {
                break;
            };
            if self.seen.get(&token).is_some_and(|(s, _)| *s == seq) {
                self.seen.remove(&token);
                evicted += 1;
            }
        }
        evicted
    }
}

impl DedupGuard {
    pub fn new(capacity: usize, evict_batch: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            evict_batch: evict_batch.clamp(1, capacity.max(1)),
            inner: RwLock::new(DedupInner::default()),
        }
    }

    /// Returns `false` when `token` was already accepted and is still
    /// remembered; the caller must then skip every side effect. An empty
    /// token cannot be deduplicated and is always accepted.
    pub fn accept(&self, token: &str, seen_at: DateTime<Utc>) -> bool {
        if token.is_empty() {
            return true;
        }

        // Duplicates are the hot path under redelivery storms.
        if self
            .inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .seen
            .contains_key(token)
        {
            return false;
        }

        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        // Another task may have recorded it between the two locks.
        if inner.seen.contains_key(token) {
            return false;
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.seen.insert(token.to_string(), (seq, seen_at));
        inner.order.push_back((seq, token.to_string()));

        if inner.seen.len() > self.capacity {
            let evicted = inner.evict_oldest(self.evict_batch);
            debug!("Dedup set over capacity, evicted {} oldest tokens", evicted);
        }
        true
    }

    /// Drop a token so that a redelivery is accepted again. Used when the
    /// write guarded by the token failed.
    pub fn forget(&self, token: &str) {
        if token.is_empty() {
            return;
        }
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.seen.remove(token);
        if inner.order.len() > self.capacity * 2 {
            let DedupInner { seen, order, .. } = &mut *inner;
            order.retain(|(seq, t)| seen.get(t).is_some_and(|(s, _)| s == seq));
        }
    }

    /// When `token` was first accepted, if it is still remembered.
    pub fn first_seen(&self, token: &str) -> Option<DateTime<Utc>> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .seen
            .get(token)
            .map(|(_, at)| *at)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
