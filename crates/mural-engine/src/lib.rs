//! Shared-state synchronization engine for multi-room pixel canvases and chat.
//!
//! [`Engine`] owns every piece of in-process shared state (the dedup guard and
//! the canvas read cache) and is handed the record store, the publisher and
//! the clock at construction. Adapters (HTTP, gateway sockets, pub/sub
//! deliveries) hold it behind an `Arc` and call it from any task.

pub mod cache;
pub mod canvas;
pub mod chat;
pub mod clock;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod keys;
pub mod presence;
pub mod publish;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ChatOrder, EngineConfig, RoomPolicy};
pub use engine::{Engine, Ingested, Placement};
pub use error::{EngineError, Result};
pub use publish::{Delivery, MemoryPublisher, NullPublisher, Publisher};
pub use store::{MemoryStore, Namespace, RecordStore};
