use super::ControlServer;
use crate::app::{ControlEvent, Controller};
use crate::config::PillocamConfig;
use crate::detection::Algorithm;
use crate::device::Orientation;
use crate::platform::SimulatedPlatform;
use crate::remote::StubAnalysisService;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;

async fn spawn_server(controller: &Controller) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = ControlServer::new(PillocamConfig::default().control, controller.handle());
    tokio::spawn(async move { server.serve(listener).await });
    format!("http://{}", addr)
}

fn controller() -> Controller {
    Controller::new(
        PillocamConfig::default(),
        Arc::new(SimulatedPlatform::with_default_devices()),
        Arc::new(StubAnalysisService::new()),
    )
}

#[tokio::test]
async fn test_commands_are_queued_for_controller() {
    let mut controller = controller();
    let base = spawn_server(&controller).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/camera/start", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
    assert!(matches!(
        controller.receiver.recv().await,
        Some(ControlEvent::StartCamera)
    ));

    client
        .post(format!("{}/camera/orientation", base))
        .json(&json!({ "orientation": "rear" }))
        .send()
        .await
        .unwrap();
    assert!(matches!(
        controller.receiver.recv().await,
        Some(ControlEvent::SelectOrientation(Orientation::Rear))
    ));

    client
        .post(format!("{}/algorithm", base))
        .json(&json!({ "algorithm": "algorithm3" }))
        .send()
        .await
        .unwrap();
    assert!(matches!(
        controller.receiver.recv().await,
        Some(ControlEvent::ChangeAlgorithm(Algorithm::ObjectDetection))
    ));
}

#[tokio::test]
async fn test_invalid_arguments_are_rejected() {
    let mut controller = controller();
    let base = spawn_server(&controller).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/algorithm", base))
        .json(&json!({ "algorithm": "algorithm9" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let response = client
        .post(format!("{}/camera/orientation", base))
        .json(&json!({ "orientation": "unknown" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let response = client
        .post(format!("{}/camera/device", base))
        .json(&json!({ "device_id": " " }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    assert!(controller.receiver.try_recv().is_err());
}

#[tokio::test]
async fn test_status_reflects_controller_state() {
    let mut controller = controller();
    let base = spawn_server(&controller).await;
    controller.dispatch(ControlEvent::StartCamera).await;

    let status: Value = reqwest::get(format!("{}/status", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["session"]["state"], "ready");
    assert_eq!(status["detection"]["algorithm"], "algorithm2");
    assert_eq!(status["devices"].as_array().unwrap().len(), 2);

    let health: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["camera"], "ready");

    let annotation = reqwest::get(format!("{}/annotation", base)).await.unwrap();
    assert_eq!(annotation.status(), reqwest::StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_annotation_image_is_served_decoded() {
    let mut controller = controller();
    let base = spawn_server(&controller).await;

    controller.dispatch(ControlEvent::StartCamera).await;
    controller.dispatch(ControlEvent::TestCapture).await;
    let completion = controller.receiver.recv().await.unwrap();
    assert!(matches!(completion, ControlEvent::DetectionCompleted(_)));
    controller.dispatch(completion).await;

    let annotation: Value = reqwest::get(format!("{}/annotation", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(annotation["image_data"]
        .as_str()
        .unwrap()
        .starts_with("data:image/jpeg;base64,"));

    let image = reqwest::get(format!("{}/annotation/image", base)).await.unwrap();
    assert_eq!(image.headers()["content-type"], "image/jpeg");
    let bytes = image.bytes().await.unwrap();
    assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
}

#[tokio::test]
async fn test_stopped_controller_reports_unavailable() {
    let controller = controller();
    let base = spawn_server(&controller).await;
    drop(controller);

    let response = reqwest::Client::new()
        .post(format!("{}/detection/start", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
}
