//! HTTP surface of the mural server.

pub mod canvas;
pub mod error;
pub mod gateway;
pub mod health;
pub mod messages;
pub mod users;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use mural_db::Database;
use mural_engine::Engine;
use mural_gateway::Dispatcher;

use crate::error::ApiError;

pub type AppEngine = Engine<Database, Dispatcher>;
pub type SharedEngine = Arc<AppEngine>;

#[derive(Clone)]
pub struct AppState {
    pub engine: SharedEngine,
}

impl AppState {
    pub fn new(engine: SharedEngine) -> Self {
        Self { engine }
    }
}

/// Every route the server exposes, gateway upgrade included.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/canvas", get(canvas::get_canvas))
        .route("/canvas/pixel", get(canvas::get_pixel))
        .route("/canvas/pixels", post(canvas::place_pixel))
        .route("/canvas/batch", post(canvas::place_batch))
        .route("/canvas/reset", post(canvas::reset))
        .route("/users", get(users::online))
        .route("/users/all", get(users::all))
        .route("/users/join", post(users::join))
        .route("/users/{user_id}", get(users::get_user))
        .route("/users/{user_id}/leave", post(users::leave))
        .route("/users/{user_id}/heartbeat", post(users::heartbeat))
        .route("/messages", get(messages::get_messages))
        .route("/messages", post(messages::post_message))
        .route("/health", get(health::health))
        .route("/gateway", get(gateway::upgrade))
        .with_state(state)
}

/// Run an engine call off the async runtime; the store may block on SQLite.
pub(crate) async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&AppEngine) -> mural_engine::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let engine = state.engine.clone();
    Ok(tokio::task::spawn_blocking(move || f(&engine)).await??)
}
