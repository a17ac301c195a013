use crate::app::ControlHandle;
use crate::config::ControlConfig;
use crate::error::{PillocamError, Result};
use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;

use super::handlers::{
    algorithm_handler, annotation_handler, annotation_image_handler, device_handler,
    health_handler, orientation_handler, start_camera_handler, start_detection_handler,
    status_handler, stop_camera_handler, stop_detection_handler, test_capture_handler,
};

/// Shared state for the Axum server
#[derive(Clone)]
pub struct ServerState {
    pub(crate) handle: ControlHandle,
}

/// Local HTTP surface that turns requests into controller events
pub struct ControlServer {
    config: ControlConfig,
    handle: ControlHandle,
}

impl ControlServer {
    pub fn new(config: ControlConfig, handle: ControlHandle) -> Self {
        Self { config, handle }
    }

    pub fn router(&self) -> Router {
        let state = ServerState {
            handle: self.handle.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/status", get(status_handler))
            .route("/annotation", get(annotation_handler))
            .route("/annotation/image", get(annotation_image_handler))
            .route("/camera/start", post(start_camera_handler))
            .route("/camera/stop", post(stop_camera_handler))
            .route("/camera/device", post(device_handler))
            .route("/camera/orientation", post(orientation_handler))
            .route("/detection/start", post(start_detection_handler))
            .route("/detection/stop", post(stop_detection_handler))
            .route("/detection/test", post(test_capture_handler))
            .route("/algorithm", post(algorithm_handler))
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind the configured address and serve until the task is dropped
    pub async fn start(&self) -> Result<()> {
        let addr = format!("{}:{}", self.config.ip, self.config.port);
        info!("Starting control API on {}", addr);

        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            PillocamError::component("control_api", format!("bind {} failed: {}", addr, e))
        })?;

        self.serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!("Control API listening on {}", addr);
        }

        axum::serve(listener, self.router())
            .await
            .map_err(|e| PillocamError::component("control_api", format!("server error: {}", e)))
    }
}
