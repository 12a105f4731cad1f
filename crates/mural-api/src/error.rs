use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{debug, error};

use mural_engine::EngineError;

/// Handler failure. Bodies are plain text.
#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    /// The blocking task running the engine call died.
    Join(tokio::task::JoinError),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Join(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Engine(EngineError::Validation(_)) => StatusCode::BAD_REQUEST,
            Self::Engine(EngineError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Engine(_) | Self::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            Self::Engine(e @ (EngineError::Validation(_) | EngineError::NotFound(_))) => {
                debug!("Request rejected: {}", e);
                e.to_string()
            }
            Self::Engine(e) => {
                error!("Request failed: {}", e);
                "internal error".to_string()
            }
            Self::Join(e) => {
                error!("spawn_blocking join error: {}", e);
                "internal error".to_string()
            }
        };
        (status, body).into_response()
    }
}
