use axum::{
    Json,
    extract::{Path, State},
};

use mural_types::api::{JoinRequest, UserResponse};
use mural_types::models::UserPresence;

use crate::error::ApiError;
use crate::{AppEngine, AppState, blocking};

fn respond(engine: &AppEngine, user: UserPresence) -> UserResponse {
    let online = engine.is_online(&user);
    UserResponse { user, online }
}

/// Users seen within the online timeout.
pub async fn online(State(state): State<AppState>) -> Result<Json<Vec<UserResponse>>, ApiError> {
    let users = blocking(&state, |engine| {
        Ok(engine
            .online_users()
            .into_iter()
            .map(|user| UserResponse { user, online: true })
            .collect())
    })
    .await?;
    Ok(Json(users))
}

pub async fn all(State(state): State<AppState>) -> Result<Json<Vec<UserResponse>>, ApiError> {
    let users = blocking(&state, |engine| {
        Ok(engine.users().into_iter().map(|u| respond(engine, u)).collect())
    })
    .await?;
    Ok(Json(users))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = blocking(&state, move |engine| {
        engine.user(&user_id).map(|u| respond(engine, u))
    })
    .await?;
    Ok(Json(user))
}

pub async fn join(
    State(state): State<AppState>,
    Json(req): Json<JoinRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = blocking(&state, move |engine| {
        engine.join(&req.user_id, &req.username).map(|u| respond(engine, u))
    })
    .await?;
    Ok(Json(user))
}

pub async fn leave(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = blocking(&state, move |engine| {
        engine.leave(&user_id).map(|u| respond(engine, u))
    })
    .await?;
    Ok(Json(user))
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = blocking(&state, move |engine| {
        engine.touch(&user_id).map(|u| respond(engine, u))
    })
    .await?;
    Ok(Json(user))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::test_support::{app, get, json, post_empty, post_json};

    #[tokio::test]
    async fn join_then_leave() {
        let (app, _) = app();
        let (status, body) = post_json(&app, "/users/join", json!({ "username": "ada", "userId": "u1" })).await;
        assert_eq!(status, StatusCode::OK);
        let user = json(&body);
        assert_eq!(user["id"], "u1");
        assert_eq!(user["online"], true);
        assert_eq!(user["placedCount"], 0);
        assert!(user["color"].as_str().unwrap().starts_with('#'));

        let (_, body) = get(&app, "/users").await;
        assert_eq!(json(&body).as_array().unwrap().len(), 1);

        let (status, body) = post_empty(&app, "/users/u1/leave").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["online"], false);

        let (_, body) = get(&app, "/users").await;
        assert!(json(&body).as_array().unwrap().is_empty());
        let (_, body) = get(&app, "/users/all").await;
        assert_eq!(json(&body).as_array().unwrap().len(), 1);

        let (status, body) = post_empty(&app, "/users/u1/heartbeat").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["online"], true);
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let (app, _) = app();
        let (status, _) = get(&app, "/users/ghost").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = post_empty(&app, "/users/ghost/heartbeat").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn join_validates_name() {
        let (app, _) = app();
        let (status, _) = post_json(&app, "/users/join", json!({ "username": "   ", "userId": "u1" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn painting_counts_toward_user_stats() {
        let (app, _) = app();
        post_json(
            &app,
            "/canvas/pixels",
            json!({ "x": 0, "y": 0, "color": "#000000", "userId": "u2", "username": "bob" }),
        )
        .await;
        let (status, body) = get(&app, "/users/u2").await;
        assert_eq!(status, StatusCode::OK);
        let user = json(&body);
        assert_eq!(user["name"], "bob");
        assert_eq!(user["placedCount"], 1);
    }
}
