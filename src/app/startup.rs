use super::Controller;
use crate::detection::Algorithm;
use crate::remote::DeviceRegistration;
use tracing::{info, warn};

impl Controller {
    /// Bring the client up: contact the service, pick a camera, start it.
    ///
    /// Remote failures are logged and never abort startup.
    pub async fn initialize(&mut self) {
        info!("Initializing pillocam");

        let connection = self.monitor.probe_once().await;
        info!("Analysis service is {}", connection);

        match self.service.status().await {
            Ok(status) => match status.algorithm.parse::<Algorithm>() {
                Ok(algorithm) => {
                    info!("Service reports algorithm {}", algorithm);
                    self.detection.set_algorithm(algorithm);
                }
                Err(e) => warn!("Ignoring service algorithm: {}", e),
            },
            Err(e) => warn!("Could not read service status: {}", e),
        }

        if self.config.remote.register_device {
            self.register_device().await;
        }

        self.refresh_devices().await;

        let state = self.session.start().await;
        self.after_transition(state).await;

        self.monitor.start();
        info!("Startup complete, camera {}", self.session.state().label());
    }

    async fn register_device(&mut self) {
        let registration = DeviceRegistration {
            device_type: self.device_type.as_str().to_string(),
            user_agent: self.config.camera.user_agent.clone(),
        };

        match self.service.register_device(registration).await {
            Ok(response) if response.success => {
                info!(
                    "Registered with analysis service as {}",
                    response.device_id.as_deref().unwrap_or("<unnamed>")
                );
                self.remote_device_id = response.device_id;
            }
            Ok(_) => warn!("Analysis service declined device registration"),
            Err(e) => warn!("Device registration failed: {}", e),
        }
    }
}
