use crate::app::ControlEvent;
use crate::detection::Algorithm;
use crate::device::Orientation;
use crate::frame::decode_data_uri;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::server::ServerState;

#[derive(Debug, Deserialize)]
pub struct DeviceRequest {
    pub device_id: String,
}

#[derive(Debug, Deserialize)]
pub struct OrientationRequest {
    pub orientation: String,
}

#[derive(Debug, Deserialize)]
pub struct AlgorithmRequest {
    pub algorithm: String,
}

/// Queue an event for the controller; the response only acknowledges receipt
async fn enqueue(state: &ServerState, event: ControlEvent) -> Response {
    debug!("Control API request: {:?}", event);

    match state.handle.send(event).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(json!({ "accepted": true }))).into_response(),
        Err(e) => {
            warn!("Control API could not reach the controller: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "accepted": false, "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

fn bad_request(message: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "accepted": false, "error": message })),
    )
        .into_response()
}

pub async fn health_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let snapshot = state.handle.snapshot();
    Json(json!({
        "status": "healthy",
        "camera": snapshot.session.label(),
        "connection": snapshot.connection,
        "timestamp": snapshot.generated_at,
    }))
}

pub async fn status_handler(State(state): State<ServerState>) -> impl IntoResponse {
    Json(state.handle.snapshot())
}

pub async fn annotation_handler(State(state): State<ServerState>) -> Response {
    match state.handle.annotation() {
        Some(annotation) => Json(annotation).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

/// Latest annotated frame as raw image bytes
pub async fn annotation_image_handler(State(state): State<ServerState>) -> Response {
    let Some(annotation) = state.handle.annotation() else {
        return StatusCode::NO_CONTENT.into_response();
    };

    match decode_data_uri(&annotation.image_data) {
        Ok((mime, bytes)) => ([(header::CONTENT_TYPE, mime)], bytes).into_response(),
        Err(e) => {
            warn!("Annotated frame is not a valid data URI: {}", e);
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

pub async fn start_camera_handler(State(state): State<ServerState>) -> Response {
    enqueue(&state, ControlEvent::StartCamera).await
}

pub async fn stop_camera_handler(State(state): State<ServerState>) -> Response {
    enqueue(&state, ControlEvent::StopCamera).await
}

pub async fn device_handler(
    State(state): State<ServerState>,
    Json(request): Json<DeviceRequest>,
) -> Response {
    if request.device_id.trim().is_empty() {
        return bad_request("device_id must not be empty".to_string());
    }
    enqueue(&state, ControlEvent::SelectDevice(request.device_id)).await
}

pub async fn orientation_handler(
    State(state): State<ServerState>,
    Json(request): Json<OrientationRequest>,
) -> Response {
    match request.orientation.parse::<Orientation>() {
        Ok(Orientation::Unknown) => bad_request("orientation must be front or rear".to_string()),
        Ok(orientation) => enqueue(&state, ControlEvent::SelectOrientation(orientation)).await,
        Err(e) => bad_request(e.to_string()),
    }
}

pub async fn start_detection_handler(State(state): State<ServerState>) -> Response {
    enqueue(&state, ControlEvent::EnableDetection).await
}

pub async fn stop_detection_handler(State(state): State<ServerState>) -> Response {
    enqueue(&state, ControlEvent::DisableDetection).await
}

pub async fn test_capture_handler(State(state): State<ServerState>) -> Response {
    enqueue(&state, ControlEvent::TestCapture).await
}

pub async fn algorithm_handler(
    State(state): State<ServerState>,
    Json(request): Json<AlgorithmRequest>,
) -> Response {
    match request.algorithm.parse::<Algorithm>() {
        Ok(algorithm) => enqueue(&state, ControlEvent::ChangeAlgorithm(algorithm)).await,
        Err(e) => bad_request(e.to_string()),
    }
}
