use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use crate::AppState;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let connections = state.engine.publisher().connection_count().await;
    Json(json!({ "status": "ok", "connections": connections }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use crate::test_support::{app, get, json};

    #[tokio::test]
    async fn health_reports_live_sockets() {
        let (app, state) = app();
        let (status, body) = get(&app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        let body = json(&body);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);

        let conn = state.engine.publisher().register("r1").await;
        let (_, body) = get(&app, "/health").await;
        assert_eq!(json(&body)["connections"], 1);

        state.engine.publisher().unregister(conn).await;
        let (_, body) = get(&app, "/health").await;
        assert_eq!(json(&body)["connections"], 0);
    }

    #[tokio::test]
    async fn gateway_rejects_bad_room_before_upgrade() {
        let (app, _) = app();
        let (status, _) = get(&app, "/gateway?room=a/b").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
