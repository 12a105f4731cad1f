use std::sync::Mutex;

use bytes::Bytes;

use mural_types::events::Topic;

/// One published payload as seen by a subscriber.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: Topic,
    /// `None` for events that concern every room.
    pub room: Option<String>,
    pub payload: Bytes,
}

/// Outbound half of the pub/sub transport. Implementations must not block
/// for long; delivery guarantees belong to the transport.
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: Topic, room: Option<&str>, payload: Bytes) -> anyhow::Result<()>;
}

/// Drops everything. For deployments without a transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPublisher;

impl Publisher for NullPublisher {
    fn publish(&self, _topic: Topic, _room: Option<&str>, _payload: Bytes) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Keeps every delivery in memory.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    sent: Mutex<Vec<Delivery>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self, topic: Topic) -> usize {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|d| d.topic == topic)
            .count()
    }
}

impl Publisher for MemoryPublisher {
    fn publish(&self, topic: Topic, room: Option<&str>, payload: Bytes) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Delivery {
                topic,
                room: room.map(str::to_string),
                payload,
            });
        Ok(())
    }
}
