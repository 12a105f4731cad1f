use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use mural_engine::{Delivery, Publisher};
use mural_types::events::Topic;

/// Fans engine events out to every connected socket.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Every subscriber sees every delivery and filters by room itself.
    broadcast_tx: broadcast::Sender<Delivery>,

    /// Live sockets: conn_id -> room
    connections: RwLock<HashMap<Uuid, String>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Delivery> {
        self.inner.broadcast_tx.subscribe()
    }

    pub async fn register(&self, room: &str) -> Uuid {
        let conn_id = Uuid::new_v4();
        self.inner
            .connections
            .write()
            .await
            .insert(conn_id, room.to_string());
        conn_id
    }

    pub async fn unregister(&self, conn_id: Uuid) {
        self.inner.connections.write().await.remove(&conn_id);
    }

    /// Live sockets across every room.
    pub async fn connection_count(&self) -> usize {
        self.inner.connections.read().await.len()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Publisher for Dispatcher {
    fn publish(&self, topic: Topic, room: Option<&str>, payload: Bytes) -> anyhow::Result<()> {
        // No subscribers is not a failure; nobody is listening yet.
        let _ = self.inner.broadcast_tx.send(Delivery {
            topic,
            room: room.map(str::to_string),
            payload,
        });
        Ok(())
    }
}
