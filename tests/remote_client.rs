use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::Mutex;
use pillocam::remote::{DeviceRegistration, ProcessImageRequest};
use pillocam::{
    Algorithm, AnalysisService, Controller, ControlEvent, FailureKind, HttpAnalysisClient,
    PillocamConfig, SimulatedPlatform,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

const ALGORITHMS: [&str; 3] = ["algorithm1", "algorithm2", "algorithm3"];

#[derive(Clone, Default)]
struct Backend {
    algorithm: Arc<Mutex<String>>,
    submissions: Arc<Mutex<usize>>,
    broken_status: bool,
}

async fn status(State(backend): State<Backend>) -> Response {
    if backend.broken_status {
        return "not json".into_response();
    }
    Json(json!({
        "algorithm": backend.algorithm.lock().clone(),
        "timestamp": "12:34:56",
        "count": 0,
        "is_streaming": false,
    }))
    .into_response()
}

async fn process_image(State(backend): State<Backend>, Json(body): Json<Value>) -> Response {
    let image = body["image_data"].as_str().unwrap_or_default().to_string();
    if !image.starts_with("data:image/") {
        return (StatusCode::BAD_REQUEST, "image_data must be a data URI").into_response();
    }
    *backend.submissions.lock() += 1;
    Json(json!({ "success": true, "processed_image": image, "count": 12 })).into_response()
}

async fn change_algorithm(State(backend): State<Backend>, Json(body): Json<Value>) -> Response {
    let requested = body["algorithm"].as_str().unwrap_or_default();
    if !ALGORITHMS.contains(&requested) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "detail": "Invalid algorithm" })),
        )
            .into_response();
    }
    *backend.algorithm.lock() = requested.to_string();
    Json(json!({ "success": true, "algorithm": requested })).into_response()
}

async fn register(Json(body): Json<Value>) -> Json<Value> {
    Json(json!({
        "success": true,
        "device_id": format!("{}-0001", body["device_type"].as_str().unwrap_or("unknown")),
    }))
}

async fn spawn_backend(backend: Backend) -> String {
    *backend.algorithm.lock() = "algorithm1".to_string();
    let app = Router::new()
        .route("/", get(|| async { "pill counter" }))
        .route("/api/status", get(status))
        .route("/api/process-image", post(process_image))
        .route("/api/algorithm/change", post(change_algorithm))
        .route("/api/device/register", post(register))
        .with_state(backend);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn client(base: &str) -> HttpAnalysisClient {
    HttpAnalysisClient::new(base, Duration::from_secs(2)).unwrap()
}

#[tokio::test]
async fn test_status_and_probe() {
    let base = spawn_backend(Backend::default()).await;
    let client = client(&base);

    client.probe().await.unwrap();
    let status = client.status().await.unwrap();
    assert_eq!(status.algorithm, "algorithm1");
    assert_eq!(status.timestamp.as_deref(), Some("12:34:56"));
    assert_eq!(status.is_streaming, Some(false));
    assert!(status.active_sessions.is_none());
}

#[tokio::test]
async fn test_process_image_round_trip() {
    let backend = Backend::default();
    let base = spawn_backend(backend.clone()).await;
    let client = client(&base);

    let response = client
        .process_image(ProcessImageRequest {
            image_data: "data:image/jpeg;base64,/9j/AA==".to_string(),
            algorithm: "algorithm2".to_string(),
        })
        .await
        .unwrap();
    assert!(response.success);
    assert_eq!(response.count, Some(12));
    assert_eq!(
        response.processed_image.as_deref(),
        Some("data:image/jpeg;base64,/9j/AA==")
    );
    assert_eq!(*backend.submissions.lock(), 1);
}

#[tokio::test]
async fn test_http_errors_are_processing_errors() {
    let base = spawn_backend(Backend::default()).await;
    let err = client(&base)
        .process_image(ProcessImageRequest {
            image_data: "garbage".to_string(),
            algorithm: "algorithm2".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.failure_kind(), Some(FailureKind::RemoteProcessingError));
    assert!(err.to_string().contains("400"));
}

#[tokio::test]
async fn test_malformed_body_is_processing_error() {
    let base = spawn_backend(Backend {
        broken_status: true,
        ..Backend::default()
    })
    .await;
    let err = client(&base).status().await.unwrap_err();
    assert_eq!(err.failure_kind(), Some(FailureKind::RemoteProcessingError));
}

#[tokio::test]
async fn test_unreachable_service_is_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(&format!("http://{}", addr)).probe().await.unwrap_err();
    assert_eq!(err.failure_kind(), Some(FailureKind::NetworkError));
}

#[tokio::test]
async fn test_algorithm_change_and_registration() {
    let backend = Backend::default();
    let base = spawn_backend(backend.clone()).await;
    let client = client(&base);

    client
        .change_algorithm(Algorithm::ObjectDetection)
        .await
        .unwrap();
    assert_eq!(*backend.algorithm.lock(), "algorithm3");

    let registered = client
        .register_device(DeviceRegistration {
            device_type: "desktop".to_string(),
            user_agent: "pillocam-test".to_string(),
        })
        .await
        .unwrap();
    assert!(registered.success);
    assert_eq!(registered.device_id.as_deref(), Some("desktop-0001"));
}

#[tokio::test]
async fn test_controller_against_live_backend() {
    let backend = Backend::default();
    let base = spawn_backend(backend.clone()).await;

    let mut config = PillocamConfig::default();
    config.remote.base_url = base.clone();
    config.detection.tick_interval_ms = 50;

    let mut controller = Controller::new(
        config,
        Arc::new(SimulatedPlatform::with_default_devices()),
        Arc::new(client(&base)),
    );
    let handle = controller.handle();
    controller.initialize().await;
    assert_eq!(handle.snapshot().detection.algorithm, Algorithm::Threshold);

    let task = tokio::spawn(async move {
        let reason = controller.event_loop().await;
        controller.shutdown().await;
        reason
    });

    handle.send(ControlEvent::EnableDetection).await.unwrap();

    let mut status = handle.status();
    tokio::time::timeout(Duration::from_secs(10), async {
        while status.snapshot().detection.count != 12 {
            status.changed().await;
        }
    })
    .await
    .unwrap();

    let annotation = handle.annotation().unwrap();
    assert!(annotation.image_data.starts_with("data:image/jpeg;base64,"));
    assert_eq!(annotation.count, 12);

    handle
        .send(ControlEvent::Shutdown(pillocam::ShutdownReason::UserRequest))
        .await
        .unwrap();
    task.await.unwrap().unwrap();
    assert!(*backend.submissions.lock() >= 1);
}
