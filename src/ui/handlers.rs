//! HTTP API handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::audio::device::{list_devices, AudioDeviceInfo};
use crate::error::{Error, SessionError};
use crate::protocol::{ChatMessage, SessionSnapshot, StreamConfig, StreamConfigUpdate};
use crate::ui::server::AppState;

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

type Reply<T> = (StatusCode, Json<ApiResponse<T>>);

fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::Session(SessionError::InvalidState { .. }) | Error::Session(SessionError::ConfigLocked) => {
            StatusCode::CONFLICT
        }
        Error::Session(SessionError::Closed) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Device(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failed<T>(error: Error) -> Reply<T> {
    (status_for(&error), Json(ApiResponse::error(error.to_string())))
}

/// Session status
#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub session: SessionSnapshot,
    pub message_count: usize,
    pub uptime_seconds: u64,
}

/// Get session status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<SystemStatus>> {
    let status = SystemStatus {
        session: state.session.snapshot(),
        message_count: state.messages.count(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    };

    Json(ApiResponse::ok(status))
}

/// Get the conversation so far
pub async fn get_messages(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<ChatMessage>>> {
    Json(ApiResponse::ok(state.messages.all()))
}

/// Get available audio devices
pub async fn get_devices() -> Json<ApiResponse<Vec<AudioDeviceInfo>>> {
    let devices = list_devices();
    Json(ApiResponse::ok(devices))
}

/// Get the stream configuration
pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<ApiResponse<StreamConfig>> {
    Json(ApiResponse::ok(state.session.snapshot().config))
}

/// Update the stream configuration; rejected while connected
pub async fn update_config(
    State(state): State<Arc<AppState>>,
    Json(update): Json<StreamConfigUpdate>,
) -> Reply<StreamConfig> {
    match state.session.update_config(update).await {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::ok(state.session.snapshot().config))),
        Err(e) => failed(e),
    }
}

/// Start streaming
pub async fn start_stream(State(state): State<Arc<AppState>>) -> Reply<SessionSnapshot> {
    match state.session.start_stream().await {
        Ok(()) => (StatusCode::ACCEPTED, Json(ApiResponse::ok(state.session.snapshot()))),
        Err(e) => failed(e),
    }
}

/// Stop streaming
pub async fn stop_stream(State(state): State<Arc<AppState>>) -> Reply<SessionSnapshot> {
    match state.session.stop_stream().await {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::ok(state.session.snapshot()))),
        Err(e) => failed(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct TextRequest {
    pub text: String,
}

/// Send a user text turn
pub async fn send_text(State(state): State<Arc<AppState>>, Json(req): Json<TextRequest>) -> Reply<()> {
    match state.session.send_text(req.text).await {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::ok(()))),
        Err(e) => failed(e),
    }
}

/// Turn the camera on or off
pub async fn toggle_camera(State(state): State<Arc<AppState>>) -> Reply<SessionSnapshot> {
    match state.session.toggle_camera().await {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::ok(state.session.snapshot()))),
        Err(e) => failed(e),
    }
}
