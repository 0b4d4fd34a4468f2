use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::AppState;
use crate::client::ApiError;
use crate::control::ControlCommand;
use crate::types::{EditRejected, SettingValue};

// === Settings Endpoints ===

pub async fn get_settings(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.settings().await;
    Json(store.panel().await)
}

#[derive(Debug, Deserialize)]
pub struct EditRequest {
    pub key: String,
    pub value: SettingValue,
}

pub async fn post_edit(
    State(state): State<AppState>,
    Json(request): Json<EditRequest>,
) -> impl IntoResponse {
    let store = state.settings().await;
    match store.edit(&request.key, request.value).await {
        Ok(pending) => (
            StatusCode::OK,
            Json(json!({"status": "ok", "seq": pending.seq, "patch": pending.patch})),
        )
            .into_response(),
        Err(e @ EditRejected::Locked { .. }) => {
            (StatusCode::LOCKED, Json(json!({"error": e.to_string()}))).into_response()
        }
        Err(e) => {
            debug!(error = %e, "Settings edit rejected");
            (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()}))).into_response()
        }
    }
}

pub async fn post_toggle_lock(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    let store = state.settings().await;
    match store.toggle_lock(&key).await {
        Ok(locked) => (
            StatusCode::OK,
            Json(json!({"key": key, "locked": locked, "checked": !locked})),
        )
            .into_response(),
        Err(e) => (StatusCode::NOT_FOUND, Json(json!({"error": e.to_string()}))).into_response(),
    }
}

pub async fn post_reset(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.settings().await;
    let changed = match store.reset_to_defaults().await {
        Some(pending) => pending.patch,
        None => Default::default(),
    };
    Json(json!({"status": "ok", "changed": changed}))
}

pub async fn post_reload(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.remount_settings().await;
    Json(store.panel().await)
}

// === Trade Endpoints ===

pub async fn get_trades(State(state): State<AppState>) -> impl IntoResponse {
    let feed = state.dashboard.feed().await;
    let failures = state.dashboard.consecutive_failures().await;
    Json(json!({
        "trades": feed.trades(),
        "stats": feed.stats(),
        "fetched_at": feed.fetched_at(),
        "consecutive_failures": failures,
    }))
}

pub async fn post_select(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.dashboard.select(&id).await {
        Some(trade) => (StatusCode::OK, Json(json!({"trade": trade}))).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("Trade {} is not in the current feed", id)})),
        )
            .into_response(),
    }
}

pub async fn get_selected(State(state): State<AppState>) -> impl IntoResponse {
    let inspector = state.dashboard.inspector().await;
    let feed = state.dashboard.feed().await;
    Json(json!({
        "trade": inspector.selected(),
        "details": inspector.details_json(),
        "stale": inspector.is_stale(&feed),
    }))
}

pub async fn delete_selected(State(state): State<AppState>) -> impl IntoResponse {
    state.dashboard.close_inspector().await;
    Json(json!({"status": "ok"}))
}

// === Control Endpoints ===

pub async fn get_controls(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.controls.status())
}

pub async fn post_control(
    State(state): State<AppState>,
    Path(command): Path<String>,
) -> impl IntoResponse {
    let command: ControlCommand = match command.parse() {
        Ok(command) => command,
        Err(e) => return (StatusCode::NOT_FOUND, Json(json!({"error": e}))).into_response(),
    };

    match state.controls.trigger(command) {
        Some(_) => {
            info!(%command, "Command triggered from dashboard");
            (StatusCode::ACCEPTED, Json(json!({"status": "sent", "command": command}))).into_response()
        }
        None => (
            StatusCode::OK,
            Json(json!({"status": "busy", "command": command})),
        )
            .into_response(),
    }
}

// === Health Check ===

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub backend: &'static str,
}

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let backend = match state.api.health().await {
        Ok(()) => "ok",
        Err(ApiError::NotConfigured) => "not_configured",
        Err(e) => {
            debug!(error = %e, "Backend health check failed");
            "unreachable"
        }
    };

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        backend,
    })
}
